//! Configuration for the chunkstream engine
//!
//! Bootstrap TOML file with built-in defaults for every field. Settings
//! sources priority:
//!
//! 1. Command-line arguments (--port, --cache-dir, --database)
//! 2. Environment variables (CHUNKSTREAM_PORT, ...)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)

use crate::error::{Error, Result};
use chunkstream_common::config::{default_data_dir, LoggingConfig};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// HTTP/WebSocket port
    #[serde(default = "default_port")]
    pub port: u16,

    /// SQLite catalog database
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Root of the processed-chunk cache
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub buffering: BufferingConfig,
}

/// Chunk geometry and delivery settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Nominal chunk length in seconds
    pub chunk_duration_secs: f64,
    /// Overlap shared between adjacent chunks, in seconds
    pub overlap_secs: f64,
    /// Audio frames per delivery message
    pub message_frames: usize,
    /// Bounded delivery queue capacity (messages)
    pub queue_capacity: usize,
    /// Global ceiling on concurrently active streams
    pub max_concurrent_streams: usize,
    /// Give up waiting for a stream slot after this long (None = wait indefinitely)
    pub admission_timeout_ms: Option<u64>,
    /// Heartbeat interval while the delivery queue is idle
    pub heartbeat_interval_ms: u64,
    /// Connection liveness poll while waiting for admission
    pub liveness_poll_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_duration_secs: 10.0,
            overlap_secs: 3.0,
            message_frames: 16_384,
            queue_capacity: 4,
            max_concurrent_streams: 10,
            admission_timeout_ms: None,
            heartbeat_interval_ms: 5_000,
            liveness_poll_ms: 100,
        }
    }
}

impl StreamingConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn liveness_poll(&self) -> Duration {
        Duration::from_millis(self.liveness_poll_ms)
    }

    pub fn admission_timeout(&self) -> Option<Duration> {
        self.admission_timeout_ms.map(Duration::from_millis)
    }
}

/// Predictive multi-preset buffering settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferingConfig {
    /// Every preset the buffer worker keeps warm
    pub presets: Vec<String>,
    /// Chunks to preload per preset
    pub preload_chunks: usize,
    /// Worker loop period
    pub poll_interval_ms: u64,
    /// Delay between consecutive chunk fills
    pub throttle_ms: u64,
}

impl Default for BufferingConfig {
    fn default() -> Self {
        Self {
            presets: ["adaptive", "gentle", "warm", "bright", "punchy"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            preload_chunks: 3,
            poll_interval_ms: 2_000,
            throttle_ms: 100,
        }
    }
}

impl BufferingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

fn default_port() -> u16 {
    8765
}

fn default_database_path() -> PathBuf {
    default_data_dir().join("library.db")
}

fn default_cache_dir() -> PathBuf {
    default_data_dir().join("chunk_cache")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            database_path: default_database_path(),
            cache_dir: default_cache_dir(),
            logging: LoggingConfig::default(),
            streaming: StreamingConfig::default(),
            buffering: BufferingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let s = &self.streaming;
        if !(s.chunk_duration_secs > 0.0) {
            return Err(Error::Config(format!(
                "chunk_duration_secs must be positive, got {}",
                s.chunk_duration_secs
            )));
        }
        if s.overlap_secs < 0.0 || s.overlap_secs >= s.chunk_duration_secs {
            return Err(Error::Config(format!(
                "overlap_secs must be in [0, chunk_duration_secs), got {}",
                s.overlap_secs
            )));
        }
        if s.message_frames == 0 {
            return Err(Error::Config("message_frames must be at least 1".to_string()));
        }
        if s.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".to_string()));
        }
        if s.max_concurrent_streams == 0 {
            return Err(Error::Config("max_concurrent_streams must be at least 1".to_string()));
        }
        if self.buffering.presets.is_empty() {
            return Err(Error::Config("buffering.presets must not be empty".to_string()));
        }
        Ok(())
    }
}
