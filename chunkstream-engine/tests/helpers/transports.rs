//! Scriptable transport
//!
//! Records every delivered message. Optionally stalls sends behind a gate,
//! disconnects after a number of sends, or reports to a gauge shared by
//! several transports to observe how many streams overlap.

use async_trait::async_trait;
use chunkstream_common::StreamMessage;
use chunkstream_engine::streaming::{ConnectionId, Transport};
use chunkstream_engine::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Streams between `audio_stream_start` and their terminal message
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }
}

pub struct ScriptedTransport {
    id: ConnectionId,
    connected: AtomicBool,
    messages: Mutex<Vec<StreamMessage>>,
    sends: AtomicUsize,
    gate: Option<Semaphore>,
    disconnect_after: Option<usize>,
    send_delay: Duration,
    gauge: Option<Arc<ConcurrencyGauge>>,
}

impl ScriptedTransport {
    fn build(gate: Option<Semaphore>, disconnect_after: Option<usize>) -> Self {
        Self {
            id: Uuid::new_v4(),
            connected: AtomicBool::new(true),
            messages: Mutex::new(Vec::new()),
            sends: AtomicUsize::new(0),
            gate,
            disconnect_after,
            send_delay: Duration::ZERO,
            gauge: None,
        }
    }

    /// Delivers everything immediately
    pub fn recording() -> Self {
        Self::build(None, None)
    }

    /// Every send waits for a permit from [`release`](Self::release)
    pub fn stalling() -> Self {
        Self::build(Some(Semaphore::new(0)), None)
    }

    /// Accepts `sends` messages, then drops the connection
    pub fn disconnecting_after(sends: usize) -> Self {
        Self::build(None, Some(sends))
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    pub fn with_gauge(mut self, gauge: Arc<ConcurrencyGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Let `sends` stalled sends through
    pub fn release(&self, sends: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(sends);
        }
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<StreamMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Delivered `audio_chunk` messages in order
    pub fn audio_chunks(&self) -> Vec<StreamMessage> {
        self.messages()
            .into_iter()
            .filter(|m| matches!(m, StreamMessage::AudioChunk { .. }))
            .collect()
    }

    /// Concatenated samples of every delivered audio message
    pub fn delivered_samples(&self) -> Vec<f32> {
        self.messages()
            .into_iter()
            .flat_map(|m| match m {
                StreamMessage::AudioChunk { samples, .. } => samples,
                _ => Vec::new(),
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<StreamMessage> {
        self.messages()
            .into_iter()
            .filter(|m| matches!(m, StreamMessage::AudioStreamError { .. }))
            .collect()
    }

    pub fn heartbeats(&self) -> usize {
        self.messages()
            .iter()
            .filter(|m| matches!(m, StreamMessage::Heartbeat { .. }))
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, message: StreamMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::ConnectionLost("scripted transport closed".to_string()));
        }
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| Error::ConnectionLost("gate closed".to_string()))?
                .forget();
        }
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }
        if let Some(limit) = self.disconnect_after {
            if self.sends.load(Ordering::SeqCst) >= limit {
                self.disconnect();
                return Err(Error::ConnectionLost("scripted disconnect".to_string()));
            }
        }

        if let Some(gauge) = &self.gauge {
            match &message {
                StreamMessage::AudioStreamStart { .. } => gauge.enter(),
                m if m.is_terminal() => gauge.leave(),
                _ => {}
            }
        }
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}
