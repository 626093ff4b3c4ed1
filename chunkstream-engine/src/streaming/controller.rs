//! Audio Stream Controller
//!
//! Runs one streaming session per `(connection, stream type)`.
//!
//! **Session flow:**
//! 1. Replace any session already running for the same connection and type
//! 2. Wait for a concurrency slot, abandoning if the client disconnects
//! 3. Open a processor, announce the stream, render chunks in order into the
//!    bounded delivery queue
//! 4. On a chunk failure: drop the retained tail, discard the chunk's cache
//!    entry, send `audio_stream_error` with the resume point
//! 5. Release the slot and leave the registry
//!
//! **Concurrency:** the slot count bounds admitted sessions. Waiting for a
//! slot is not an error unless `admission_timeout_ms` is configured.

use crate::buffering::BufferManager;
use crate::catalog::Catalog;
use crate::config::StreamingConfig;
use crate::error::{Error, Result};
use crate::processing::{ChunkPipeline, ChunkedAudioProcessor, ProcessingMode};
use crate::streaming::session::{
    DeliveryQueue, SessionStats, SlotPermit, StreamOutcome, StreamRequest,
};
use crate::streaming::transport::{ConnectionId, Transport};
use chunkstream_common::{StreamMessage, StreamType};
use std::collections::HashMap;
use std::future::pending;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type SessionKey = (ConnectionId, StreamType);

/// Registry entry for a live session
struct SessionEntry {
    id: u64,
    track_id: i64,
    cancel_token: CancellationToken,
    stats: Arc<SessionStats>,
    /// Set once the session is admitted
    slot: Option<Arc<SlotPermit>>,
}

impl SessionEntry {
    /// Cancel producer and consumer and return the slot
    fn stop(self) {
        self.cancel_token.cancel();
        if let Some(slot) = self.slot {
            slot.release();
        }
    }
}

/// Snapshot of one session for diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub connection_id: ConnectionId,
    pub stream_type: StreamType,
    pub track_id: i64,
    pub admitted: bool,
    pub frames_pushed: usize,
    pub frames_delivered: usize,
    pub chunks_rendered: usize,
}

/// Coordinates every streaming session
pub struct AudioStreamController {
    pipeline: Arc<ChunkPipeline>,
    catalog: Arc<dyn Catalog>,
    buffer_manager: Option<Arc<BufferManager>>,
    config: StreamingConfig,
    slots: Arc<Semaphore>,
    sessions: RwLock<HashMap<SessionKey, SessionEntry>>,
    next_session_id: AtomicU64,
    shutdown_token: CancellationToken,
}

impl AudioStreamController {
    pub fn new(
        pipeline: Arc<ChunkPipeline>,
        catalog: Arc<dyn Catalog>,
        buffer_manager: Option<Arc<BufferManager>>,
        config: StreamingConfig,
    ) -> Self {
        let max_streams = config.max_concurrent_streams;
        Self {
            pipeline,
            catalog,
            buffer_manager,
            config,
            slots: Arc::new(Semaphore::new(max_streams)),
            sessions: RwLock::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn max_streams(&self) -> usize {
        self.config.max_concurrent_streams
    }

    /// Slots currently free
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Sessions holding a slot
    pub fn active_streams(&self) -> usize {
        self.max_streams().saturating_sub(self.available_slots())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Run a session to completion.
    ///
    /// Errors are returned only when the session never started delivering
    /// (shutdown, admission timeout); everything after admission ends in a
    /// [`StreamOutcome`] and the client has been told.
    pub async fn start_stream(
        &self,
        transport: Arc<dyn Transport>,
        request: StreamRequest,
    ) -> Result<StreamOutcome> {
        if self.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }

        let connection_id = transport.connection_id();
        let stream_type = request.mode.stream_type();
        let key = (connection_id, stream_type);

        let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let cancel_token = self.shutdown_token.child_token();
        let stats = Arc::new(SessionStats::default());
        let replaced = self.sessions.write().await.insert(
            key,
            SessionEntry {
                id: session_id,
                track_id: request.track_id,
                cancel_token: cancel_token.clone(),
                stats: Arc::clone(&stats),
                slot: None,
            },
        );
        if let Some(previous) = replaced {
            info!(connection = %connection_id, %stream_type, "Replacing running session");
            previous.stop();
        }

        let outcome = self
            .admit_and_run(&transport, &request, key, session_id, &cancel_token, stats)
            .await;

        // Leave the registry unless a replacement already took our place
        let mut sessions = self.sessions.write().await;
        if sessions.get(&key).is_some_and(|entry| entry.id == session_id) {
            if let Some(entry) = sessions.remove(&key) {
                if let Some(slot) = entry.slot {
                    slot.release();
                }
            }
        }
        let track_still_streamed = sessions
            .iter()
            .any(|((_, t), entry)| *t == StreamType::Enhanced && entry.track_id == request.track_id);
        drop(sessions);

        if let (Some(manager), StreamType::Enhanced) = (&self.buffer_manager, stream_type) {
            if !track_still_streamed && manager.clear_current_track(request.track_id).await {
                debug!(track_id = request.track_id, "Last enhanced session ended, buffering idle");
            }
        }

        match &outcome {
            Ok(outcome) => info!(
                connection = %connection_id,
                %stream_type,
                track_id = request.track_id,
                "Session ended: {:?}",
                outcome
            ),
            Err(e) => warn!(connection = %connection_id, %stream_type, "Session not started: {}", e),
        }
        outcome
    }

    async fn admit_and_run(
        &self,
        transport: &Arc<dyn Transport>,
        request: &StreamRequest,
        key: SessionKey,
        session_id: u64,
        cancel_token: &CancellationToken,
        stats: Arc<SessionStats>,
    ) -> Result<StreamOutcome> {
        let permit = match self.acquire_slot(transport.as_ref(), cancel_token).await {
            Ok(permit) => permit,
            Err(Error::ConnectionLost(_)) => {
                info!(connection = %key.0, "Client left while waiting for a slot");
                return Ok(StreamOutcome::Abandoned);
            }
            Err(Error::Cancelled) => return Ok(StreamOutcome::Stopped),
            Err(e @ Error::StreamCapacityExceeded { .. }) => {
                let position = self.nominal_position(request.start_chunk);
                let _ = transport
                    .send(self.error_message(request, request.start_chunk, &e, position))
                    .await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let slot = Arc::new(SlotPermit::new(permit));
        {
            let mut sessions = self.sessions.write().await;
            match sessions.get_mut(&key) {
                Some(entry) if entry.id == session_id => entry.slot = Some(Arc::clone(&slot)),
                // Stopped between admission and registration
                _ => return Ok(StreamOutcome::Stopped),
            }
        }
        debug!(
            connection = %key.0,
            active = self.active_streams(),
            "Session admitted"
        );

        let outcome = self.run_session(transport, request, cancel_token, stats).await;
        slot.release();
        Ok(outcome)
    }

    /// Wait for a slot while watching the connection and the stop signal
    async fn acquire_slot(
        &self,
        transport: &dyn Transport,
        cancel_token: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit> {
        if let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() {
            return Ok(permit);
        }
        info!(
            connection = %transport.connection_id(),
            max_streams = self.max_streams(),
            "All stream slots busy, waiting"
        );

        let acquire = Arc::clone(&self.slots).acquire_owned();
        tokio::pin!(acquire);

        let deadline = self.config.admission_timeout().map(|t| Instant::now() + t);
        let timeout = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                permit = &mut acquire => {
                    return permit.map_err(|_| Error::ShuttingDown);
                }
                _ = cancel_token.cancelled() => return Err(Error::Cancelled),
                _ = &mut timeout => {
                    return Err(Error::StreamCapacityExceeded {
                        max_streams: self.max_streams(),
                    });
                }
                _ = sleep(self.config.liveness_poll()) => {
                    if !transport.is_connected() {
                        return Err(Error::ConnectionLost("disconnected during admission".to_string()));
                    }
                }
            }
        }
    }

    /// Admitted part of a session: open, deliver, recover
    async fn run_session(
        &self,
        transport: &Arc<dyn Transport>,
        request: &StreamRequest,
        cancel_token: &CancellationToken,
        stats: Arc<SessionStats>,
    ) -> StreamOutcome {
        let mut processor = match self.open_processor(request).await {
            Ok(processor) => processor,
            Err(e) => {
                error!(track_id = request.track_id, "Cannot open stream: {}", e);
                let position = self.nominal_position(request.start_chunk);
                let _ = transport
                    .send(self.error_message(request, request.start_chunk, &e, position))
                    .await;
                return StreamOutcome::Failed {
                    chunk_index: request.start_chunk,
                    recovery_position: position,
                };
            }
        };

        if let (Some(manager), ProcessingMode::Enhanced { intensity, .. }) =
            (&self.buffer_manager, &request.mode)
        {
            manager
                .set_current_track(
                    processor.track().clone(),
                    *intensity,
                    Some(processor.total_chunks()),
                )
                .await;
        }

        let delivery_token = cancel_token.child_token();
        let (queue, consumer) = DeliveryQueue::spawn(
            Arc::clone(transport),
            self.config.queue_capacity,
            self.config.heartbeat_interval(),
            self.config.liveness_poll(),
            delivery_token.clone(),
            Arc::clone(&stats),
        );

        let produced = self
            .produce(&mut processor, request, &queue, cancel_token, &stats)
            .await;
        queue.close();
        if produced.is_err() {
            delivery_token.cancel();
        }

        let consumed = match consumer.await {
            Ok(result) => result,
            Err(e) => Err(Error::Internal(format!("Consumer task failed: {}", e))),
        };

        match produced {
            Err(Error::Cancelled) => StreamOutcome::Stopped,
            Err(e) => {
                debug!(track_id = request.track_id, "Producer stopped: {}", e);
                StreamOutcome::Disconnected
            }
            Ok(outcome) => match consumed {
                Ok(()) => outcome,
                Err(Error::Cancelled) => StreamOutcome::Stopped,
                Err(e) => {
                    debug!(track_id = request.track_id, "Consumer stopped: {}", e);
                    StreamOutcome::Disconnected
                }
            },
        }
    }

    async fn open_processor(&self, request: &StreamRequest) -> Result<ChunkedAudioProcessor> {
        let track = self
            .catalog
            .get_track_by_id(request.track_id)
            .await?
            .ok_or(Error::TrackNotFound(request.track_id))?;
        self.pipeline.open(track, request.mode.clone()).await
    }

    /// Producer: render chunks in order and push them as audio frames
    async fn produce(
        &self,
        processor: &mut ChunkedAudioProcessor,
        request: &StreamRequest,
        queue: &DeliveryQueue,
        cancel_token: &CancellationToken,
        stats: &SessionStats,
    ) -> Result<StreamOutcome> {
        let total_chunks = processor.total_chunks();
        let geometry = *processor.geometry();

        queue
            .push(StreamMessage::AudioStreamStart {
                track_id: request.track_id,
                stream_type: request.mode.stream_type(),
                preset: request.mode.preset().map(str::to_string),
                intensity: request.mode.intensity(),
                total_chunks,
                sample_rate: geometry.sample_rate,
                channels: processor.channels(),
                start_chunk: request.start_chunk,
            })
            .await?;

        for chunk_index in request.start_chunk..total_chunks {
            let rendered = tokio::select! {
                _ = cancel_token.cancelled() => return Err(Error::Cancelled),
                rendered = processor.render_chunk(chunk_index) => rendered,
            };

            let pcm = match rendered {
                Ok(pcm) => pcm,
                Err(e) => {
                    return self
                        .recover_from_failure(processor, request, queue, chunk_index, e)
                        .await;
                }
            };
            stats.record_chunk();

            if let (Some(manager), Some(key)) = (&self.buffer_manager, processor.cache_key(chunk_index)) {
                manager.observe_signature(key.track_id, &key.signature).await;
                manager
                    .mark_chunk_ready(
                        key.track_id,
                        &key.preset,
                        chunk_index,
                        request.mode.intensity(),
                    )
                    .await;
            }

            let frames_per_message = self.config.message_frames;
            let frame_count = pcm.piece_count(frames_per_message);
            debug!(
                track_id = request.track_id,
                chunk = chunk_index,
                frames = pcm.frames(),
                messages = frame_count,
                "Delivering chunk"
            );
            for (frame_index, samples) in pcm.pieces(frames_per_message).enumerate() {
                queue
                    .push(StreamMessage::AudioChunk {
                        track_id: request.track_id,
                        chunk_index,
                        total_chunks,
                        frame_index,
                        frame_count,
                        samples: samples.to_vec(),
                    })
                    .await?;
            }
        }

        queue
            .push(StreamMessage::AudioStreamEnd {
                track_id: request.track_id,
                total_chunks,
            })
            .await?;

        Ok(StreamOutcome::Completed {
            chunks_delivered: total_chunks.saturating_sub(request.start_chunk),
        })
    }

    /// Clean up after a failed chunk and tell the client where to resume
    async fn recover_from_failure(
        &self,
        processor: &mut ChunkedAudioProcessor,
        request: &StreamRequest,
        queue: &DeliveryQueue,
        chunk_index: usize,
        failure: Error,
    ) -> Result<StreamOutcome> {
        processor.reset_tail();
        processor.discard_chunk(chunk_index);

        let recovery_position = processor.geometry().recovery_position(chunk_index);
        error!(
            track_id = request.track_id,
            chunk = chunk_index,
            recovery_position,
            "Chunk failed, ending stream: {}",
            failure
        );

        queue
            .push(self.error_message(request, chunk_index, &failure, recovery_position))
            .await?;

        Ok(StreamOutcome::Failed {
            chunk_index,
            recovery_position,
        })
    }

    fn error_message(
        &self,
        request: &StreamRequest,
        chunk_index: usize,
        error: &Error,
        recovery_position: f64,
    ) -> StreamMessage {
        StreamMessage::AudioStreamError {
            track_id: request.track_id,
            chunk_index,
            error: error.to_string(),
            recovery_position,
            resume_chunk: chunk_index,
        }
    }

    /// Start of a chunk's delivered range from configured durations, for
    /// failures before the track's exact geometry is known
    fn nominal_position(&self, chunk_index: usize) -> f64 {
        if chunk_index == 0 {
            return 0.0;
        }
        let start = chunk_index as f64 * self.config.chunk_duration_secs - self.config.overlap_secs;
        start.max(0.0)
    }

    /// Stop the session for a connection and stream type.
    ///
    /// Cancels producer and consumer and returns the slot. Returns false if
    /// no such session was running. Safe to call any number of times.
    pub async fn stop_stream(&self, connection_id: ConnectionId, stream_type: StreamType) -> bool {
        let entry = self.sessions.write().await.remove(&(connection_id, stream_type));
        match entry {
            Some(entry) => {
                entry.stop();
                debug!(connection = %connection_id, %stream_type, "Session stopped");
                true
            }
            None => false,
        }
    }

    /// Stop every session of a connection (on disconnect)
    pub async fn stop_connection(&self, connection_id: ConnectionId) -> usize {
        let mut stopped = 0;
        for stream_type in [StreamType::Enhanced, StreamType::Original] {
            if self.stop_stream(connection_id, stream_type).await {
                stopped += 1;
            }
        }
        stopped
    }

    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|((connection_id, stream_type), entry)| SessionInfo {
                connection_id: *connection_id,
                stream_type: *stream_type,
                track_id: entry.track_id,
                admitted: entry.slot.as_ref().is_some_and(|slot| slot.is_held()),
                frames_pushed: entry.stats.frames_pushed(),
                frames_delivered: entry.stats.frames_delivered(),
                chunks_rendered: entry.stats.chunks_rendered(),
            })
            .collect()
    }

    /// Counters of a running session
    pub async fn session_stats(
        &self,
        connection_id: ConnectionId,
        stream_type: StreamType,
    ) -> Option<Arc<SessionStats>> {
        self.sessions
            .read()
            .await
            .get(&(connection_id, stream_type))
            .map(|entry| Arc::clone(&entry.stats))
    }

    /// Refuse new sessions and stop every running one
    pub async fn shutdown(&self) {
        info!("Stream controller shutting down");
        self.shutdown_token.cancel();
        self.slots.close();

        let entries: Vec<SessionEntry> = self.sessions.write().await.drain().map(|(_, e)| e).collect();
        for entry in entries {
            entry.stop();
        }
    }
}
