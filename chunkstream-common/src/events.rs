//! Wire message types exchanged with streaming clients
//!
//! Messages are serialized with a `type` tag so the browser can dispatch on
//! it. PCM payloads are not part of the JSON document: the transport decides
//! how to frame them (see `chunkstream-engine`'s WebSocket adapter).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of stream a session delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    /// Chunks run through the enhancement capability and the chunk cache
    Enhanced,
    /// Unmodified source audio, no cache involvement
    Original,
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamType::Enhanced => write!(f, "enhanced"),
            StreamType::Original => write!(f, "original"),
        }
    }
}

/// Server → client messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Session admitted, delivery about to begin
    AudioStreamStart {
        track_id: i64,
        stream_type: StreamType,
        preset: Option<String>,
        intensity: f32,
        total_chunks: usize,
        sample_rate: u32,
        channels: u16,
        start_chunk: usize,
    },

    /// One frame of PCM belonging to a chunk
    AudioChunk {
        track_id: i64,
        chunk_index: usize,
        total_chunks: usize,
        /// Index of this frame within the chunk
        frame_index: usize,
        /// Number of frames the chunk was split into
        frame_count: usize,
        /// Interleaved f32 samples; framed separately by the transport
        #[serde(skip)]
        samples: Vec<f32>,
    },

    /// Every chunk has been delivered
    AudioStreamEnd {
        track_id: i64,
        total_chunks: usize,
    },

    /// Terminal failure; the client may reissue from `resume_chunk`
    AudioStreamError {
        track_id: i64,
        chunk_index: usize,
        error: String,
        /// Playback offset in seconds where delivered audio ends
        recovery_position: f64,
        resume_chunk: usize,
    },

    /// Liveness probe sent while the delivery queue is idle
    Heartbeat { timestamp: DateTime<Utc> },
}

impl StreamMessage {
    /// Number of interleaved samples carried, zero for control messages
    pub fn sample_count(&self) -> usize {
        match self {
            StreamMessage::AudioChunk { samples, .. } => samples.len(),
            _ => 0,
        }
    }

    /// True for messages that end a session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamMessage::AudioStreamEnd { .. } | StreamMessage::AudioStreamError { .. }
        )
    }
}

/// Client → server commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    PlayEnhanced {
        track_id: i64,
        preset: String,
        #[serde(default = "default_intensity")]
        intensity: f32,
        #[serde(default)]
        start_chunk: usize,
    },
    PlayOriginal {
        track_id: i64,
        #[serde(default)]
        start_chunk: usize,
    },
    Stop {
        #[serde(default)]
        stream_type: Option<StreamType>,
    },
}

fn default_intensity() -> f32 {
    1.0
}
