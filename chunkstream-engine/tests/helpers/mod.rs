//! Shared fixtures for chunkstream-engine integration tests
//!
//! - `audio_generator`: WAV fixtures with known sample values
//! - `enhancers`: counting and failure-injecting enhancers
//! - `transports`: recording, stalling and disconnecting transports
//! - `catalog`: in-memory track catalog

#![allow(dead_code)]

pub mod audio_generator;
pub mod catalog;
pub mod enhancers;
pub mod transports;

pub use audio_generator::{generate_ramp_wav, ramp_sample, ramp_track, track_for, RATE};
pub use catalog::StaticCatalog;
pub use enhancers::{CountingEnhancer, FailingEnhancer};
pub use transports::{ConcurrencyGauge, ScriptedTransport};

use chunkstream_engine::buffering::BufferManager;
use chunkstream_engine::catalog::Track;
use chunkstream_engine::config::StreamingConfig;
use chunkstream_engine::processing::{ChunkCache, ChunkPipeline, Enhancer};
use chunkstream_engine::streaming::AudioStreamController;
use std::path::Path;
use std::sync::Arc;

/// 1 s chunks, 0.25 s overlap, 250 frames per message, queue of 2
pub fn streaming_config() -> StreamingConfig {
    StreamingConfig {
        chunk_duration_secs: 1.0,
        overlap_secs: 0.25,
        message_frames: 250,
        queue_capacity: 2,
        max_concurrent_streams: 10,
        admission_timeout_ms: None,
        heartbeat_interval_ms: 1_000,
        liveness_poll_ms: 5,
    }
}

/// Controller plus the pipeline it streams from
pub struct Harness {
    pub pipeline: Arc<ChunkPipeline>,
    pub controller: Arc<AudioStreamController>,
}

impl Harness {
    pub fn new(
        cache_root: &Path,
        enhancer: Arc<dyn Enhancer>,
        tracks: Vec<Track>,
        config: StreamingConfig,
    ) -> Self {
        Self::with_buffer_manager(cache_root, enhancer, tracks, config, None)
    }

    pub fn with_buffer_manager(
        cache_root: &Path,
        enhancer: Arc<dyn Enhancer>,
        tracks: Vec<Track>,
        config: StreamingConfig,
        buffer_manager: Option<Arc<BufferManager>>,
    ) -> Self {
        let pipeline = Arc::new(ChunkPipeline::new(
            ChunkCache::new(cache_root.join("cache")),
            enhancer,
            &config,
        ));
        let controller = Arc::new(AudioStreamController::new(
            Arc::clone(&pipeline),
            Arc::new(StaticCatalog::with_tracks(tracks)),
            buffer_manager,
            config,
        ));
        Self {
            pipeline,
            controller,
        }
    }
}

/// Wait until `condition` holds, polling every few milliseconds
pub async fn eventually<F, Fut>(timeout_ms: u64, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    condition().await
}
