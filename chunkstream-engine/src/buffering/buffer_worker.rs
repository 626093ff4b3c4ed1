//! Buffer Worker
//!
//! Background loop that fills the buffer manager's outstanding set, one
//! chunk at a time. Each pass first checks the active track's file
//! signature; a changed source drops its ready marks and stale entries.
//!
//! **Lifecycle:** `Stopped → Running → Stopped`. A stop request is observed
//! between chunks and during sleeps; a chunk already being produced always
//! finishes first.

use crate::buffering::buffer_manager::{ActiveTrack, BufferManager};
use crate::config::BufferingConfig;
use crate::error::{Error, Result};
use crate::processing::{ChunkPipeline, ProcessingMode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Worker run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Running,
}

struct RunningWorker {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Pre-fills the chunk cache for every configured preset
pub struct BufferWorker {
    manager: Arc<BufferManager>,
    pipeline: Arc<ChunkPipeline>,
    poll_interval: Duration,
    throttle: Duration,
    running: Mutex<Option<RunningWorker>>,
}

impl BufferWorker {
    pub fn new(
        manager: Arc<BufferManager>,
        pipeline: Arc<ChunkPipeline>,
        config: &BufferingConfig,
    ) -> Self {
        Self {
            manager,
            pipeline,
            poll_interval: config.poll_interval(),
            throttle: config.throttle(),
            running: Mutex::new(None),
        }
    }

    pub fn manager(&self) -> &Arc<BufferManager> {
        &self.manager
    }

    pub async fn state(&self) -> WorkerState {
        match self.running.lock().await.as_ref() {
            Some(worker) if !worker.handle.is_finished() => WorkerState::Running,
            _ => WorkerState::Stopped,
        }
    }

    /// Spawn the worker loop. Returns false if it is already running.
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut running = self.running.lock().await;
        if let Some(worker) = running.as_ref() {
            if !worker.handle.is_finished() {
                return false;
            }
        }

        let cancel_token = CancellationToken::new();
        let worker = Arc::clone(self);
        let token = cancel_token.clone();
        let handle = tokio::spawn(async move {
            worker.run(token).await;
        });

        *running = Some(RunningWorker {
            cancel_token,
            handle,
        });
        info!("Buffer worker started");
        true
    }

    /// Request a stop and wait for the loop to exit
    pub async fn stop(&self) {
        let worker = self.running.lock().await.take();
        let Some(worker) = worker else {
            return;
        };

        worker.cancel_token.cancel();
        if let Err(e) = worker.handle.await {
            warn!("Buffer worker task ended abnormally: {}", e);
        }
        info!("Buffer worker stopped");
    }

    async fn run(&self, cancel_token: CancellationToken) {
        loop {
            match self.fill_pass(&cancel_token).await {
                Ok(0) => {}
                Ok(filled) => debug!(filled, "Buffer pass complete"),
                Err(Error::Cancelled) => break,
                Err(e) => warn!("Buffer pass failed: {}", e),
            }

            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = sleep(self.poll_interval) => {}
            }
        }
    }

    /// One pass over the outstanding set. Returns the number of chunks filled.
    ///
    /// Chunk failures are logged and skipped. Returns `Error::Cancelled` when
    /// a stop is requested.
    pub async fn fill_pass(&self, cancel_token: &CancellationToken) -> Result<usize> {
        let Some(ActiveTrack {
            track, intensity, ..
        }) = self.manager.current_track().await
        else {
            return Ok(0);
        };

        let signature = self.pipeline.current_signature(&track);
        if self.manager.observe_signature(track.id, &signature).await {
            self.pipeline.purge_stale(&track);
        }

        let needed = self.manager.get_needed_chunks(track.id, intensity).await;
        if needed.is_empty() {
            return Ok(0);
        }

        let mut filled = 0;
        for (preset, chunks) in needed {
            if cancel_token.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let processor = match self
                .pipeline
                .open(track.clone(), ProcessingMode::enhanced(&preset, intensity))
                .await
            {
                Ok(processor) => processor,
                Err(e) => {
                    warn!(track_id = track.id, preset = %preset, "Cannot buffer preset: {}", e);
                    continue;
                }
            };

            for chunk_index in chunks {
                if cancel_token.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                if chunk_index >= processor.total_chunks() {
                    break;
                }
                // A stream may have produced it since the pass started
                if self.manager.is_chunk_buffered(track.id, &preset, chunk_index).await {
                    continue;
                }

                match processor.process_chunk_safe(chunk_index).await {
                    Ok(_) => {
                        self.manager
                            .mark_chunk_ready(track.id, &preset, chunk_index, intensity)
                            .await;
                        filled += 1;
                    }
                    Err(e) if e.is_chunk_failure() => {
                        warn!(
                            track_id = track.id,
                            preset = %preset,
                            chunk = chunk_index,
                            "Skipping chunk: {}",
                            e
                        );
                    }
                    Err(e) => {
                        error!(
                            track_id = track.id,
                            preset = %preset,
                            chunk = chunk_index,
                            "Buffering failed: {}",
                            e
                        );
                    }
                }

                tokio::select! {
                    _ = cancel_token.cancelled() => return Err(Error::Cancelled),
                    _ = sleep(self.throttle) => {}
                }

                if !self.is_still_current(track.id, intensity).await {
                    debug!(track_id = track.id, "Buffering target changed, restarting pass");
                    return Ok(filled);
                }
            }
        }

        Ok(filled)
    }

    async fn is_still_current(&self, track_id: i64, intensity: f32) -> bool {
        self.manager
            .current_track()
            .await
            .is_some_and(|a| a.track.id == track_id && a.intensity == intensity)
    }
}
