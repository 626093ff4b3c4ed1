//! Per-session delivery plumbing
//!
//! A session's producer renders chunks into a bounded queue; the consumer
//! task drains it into the transport. When the queue is full the producer
//! waits, which also pauses chunk processing for that session.

use crate::error::{Error, Result};
use crate::processing::ProcessingMode;
use crate::streaming::transport::Transport;
use chrono::Utc;
use chunkstream_common::StreamMessage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What a client asked to play
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub track_id: i64,
    pub mode: ProcessingMode,
    /// First chunk to deliver (resume index)
    pub start_chunk: usize,
}

impl StreamRequest {
    pub fn enhanced(track_id: i64, preset: impl Into<String>, intensity: f32) -> Self {
        Self {
            track_id,
            mode: ProcessingMode::enhanced(preset, intensity),
            start_chunk: 0,
        }
    }

    pub fn original(track_id: i64) -> Self {
        Self {
            track_id,
            mode: ProcessingMode::Original,
            start_chunk: 0,
        }
    }

    pub fn starting_at(mut self, start_chunk: usize) -> Self {
        self.start_chunk = start_chunk;
        self
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    /// Every chunk delivered and `audio_stream_end` sent
    Completed { chunks_delivered: usize },
    /// Chunk failure reported to the client with a resume point
    Failed {
        chunk_index: usize,
        recovery_position: f64,
    },
    /// Stopped by request, replacement or shutdown
    Stopped,
    /// Client went away mid-stream
    Disconnected,
    /// Client went away while waiting for a slot
    Abandoned,
}

/// Delivery counters for one session
#[derive(Debug, Default)]
pub struct SessionStats {
    frames_pushed: AtomicUsize,
    frames_delivered: AtomicUsize,
    chunks_rendered: AtomicUsize,
}

impl SessionStats {
    pub fn frames_pushed(&self) -> usize {
        self.frames_pushed.load(Ordering::SeqCst)
    }

    pub fn frames_delivered(&self) -> usize {
        self.frames_delivered.load(Ordering::SeqCst)
    }

    pub fn chunks_rendered(&self) -> usize {
        self.chunks_rendered.load(Ordering::SeqCst)
    }

    /// Frames queued or in the transport but not yet delivered
    pub fn frames_in_flight(&self) -> usize {
        self.frames_pushed().saturating_sub(self.frames_delivered())
    }

    pub(crate) fn record_chunk(&self) {
        self.chunks_rendered.fetch_add(1, Ordering::SeqCst);
    }
}

/// Concurrency slot held by an admitted session.
///
/// Releasing is idempotent; the slot goes back to the pool on the first
/// call (or on drop).
#[derive(Debug)]
pub struct SlotPermit {
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl SlotPermit {
    pub fn new(permit: OwnedSemaphorePermit) -> Self {
        Self {
            permit: Mutex::new(Some(permit)),
        }
    }

    /// Return the slot. True if this call released it.
    pub fn release(&self) -> bool {
        self.permit
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some()
    }

    pub fn is_held(&self) -> bool {
        self.permit
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

/// Producer side of the bounded delivery queue
pub(crate) struct DeliveryQueue {
    tx: mpsc::Sender<StreamMessage>,
    transport: Arc<dyn Transport>,
    cancel_token: CancellationToken,
    stats: Arc<SessionStats>,
    liveness_poll: Duration,
}

impl DeliveryQueue {
    /// Create the queue and spawn its consumer
    pub(crate) fn spawn(
        transport: Arc<dyn Transport>,
        capacity: usize,
        heartbeat_interval: Duration,
        liveness_poll: Duration,
        cancel_token: CancellationToken,
        stats: Arc<SessionStats>,
    ) -> (Self, tokio::task::JoinHandle<Result<()>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let consumer = tokio::spawn(consume(
            rx,
            Arc::clone(&transport),
            heartbeat_interval,
            liveness_poll,
            cancel_token.clone(),
            Arc::clone(&stats),
        ));

        (
            Self {
                tx,
                transport,
                cancel_token,
                stats,
                liveness_poll,
            },
            consumer,
        )
    }

    /// Queue a message, waiting while the queue is full.
    ///
    /// Checks liveness before the push and on every poll while blocked.
    pub(crate) async fn push(&self, message: StreamMessage) -> Result<()> {
        let is_audio = matches!(message, StreamMessage::AudioChunk { .. });

        loop {
            if self.cancel_token.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if !self.transport.is_connected() {
                return Err(Error::ConnectionLost("client disconnected".to_string()));
            }

            tokio::select! {
                reserved = self.tx.reserve() => {
                    let slot = reserved.map_err(|_| {
                        Error::ConnectionLost("delivery queue closed".to_string())
                    })?;
                    // Count first so delivered never runs ahead of pushed
                    if is_audio {
                        self.stats.frames_pushed.fetch_add(1, Ordering::SeqCst);
                    }
                    slot.send(message);
                    return Ok(());
                }
                _ = self.cancel_token.cancelled() => return Err(Error::Cancelled),
                _ = sleep(self.liveness_poll) => {}
            }
        }
    }

    /// Close the queue; the consumer drains what is left and exits
    pub(crate) fn close(self) {
        drop(self.tx);
    }
}

/// Drain the queue into the transport, sending heartbeats while idle
async fn consume(
    mut rx: mpsc::Receiver<StreamMessage>,
    transport: Arc<dyn Transport>,
    heartbeat_interval: Duration,
    liveness_poll: Duration,
    cancel_token: CancellationToken,
    stats: Arc<SessionStats>,
) -> Result<()> {
    loop {
        let next = tokio::select! {
            _ = cancel_token.cancelled() => return Err(Error::Cancelled),
            next = tokio::time::timeout(heartbeat_interval, rx.recv()) => next,
        };

        let message = match next {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(()),
            Err(_) => {
                debug!("Delivery queue idle, sending heartbeat");
                StreamMessage::Heartbeat {
                    timestamp: Utc::now(),
                }
            }
        };
        let is_audio = matches!(message, StreamMessage::AudioChunk { .. });

        let sent = tokio::select! {
            _ = cancel_token.cancelled() => return Err(Error::Cancelled),
            sent = transport.send(message) => sent,
            _ = wait_disconnected(transport.as_ref(), liveness_poll) => {
                Err(Error::ConnectionLost("client disconnected".to_string()))
            }
        };

        match sent {
            Ok(()) => {
                if is_audio {
                    stats.frames_delivered.fetch_add(1, Ordering::SeqCst);
                }
            }
            Err(e) => {
                warn!(connection = %transport.connection_id(), "Send failed: {}", e);
                return Err(Error::ConnectionLost(e.to_string()));
            }
        }
    }
}

/// Resolves once the transport reports itself disconnected
async fn wait_disconnected(transport: &dyn Transport, poll: Duration) {
    while transport.is_connected() {
        sleep(poll).await;
    }
}
