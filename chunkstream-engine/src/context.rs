//! Engine context
//!
//! Owns every long-lived component and hands out shared references. Built
//! once at startup; there is no global state.

use crate::buffering::{BufferManager, BufferWorker};
use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::processing::{ChunkCache, ChunkPipeline, Enhancer};
use crate::streaming::AudioStreamController;
use std::sync::Arc;
use tracing::info;

pub struct EngineContext {
    pub config: EngineConfig,
    pub pipeline: Arc<ChunkPipeline>,
    pub buffer_manager: Arc<BufferManager>,
    pub buffer_worker: Arc<BufferWorker>,
    pub controller: Arc<AudioStreamController>,
}

impl EngineContext {
    /// Wire the engine from validated configuration and its two capabilities
    pub fn new(
        config: EngineConfig,
        catalog: Arc<dyn Catalog>,
        enhancer: Arc<dyn Enhancer>,
    ) -> Result<Self> {
        config.validate()?;

        let pipeline = Arc::new(ChunkPipeline::new(
            ChunkCache::new(&config.cache_dir),
            enhancer,
            &config.streaming,
        ));
        let buffer_manager = Arc::new(BufferManager::new(
            config.buffering.presets.clone(),
            config.buffering.preload_chunks,
        ));
        let buffer_worker = Arc::new(BufferWorker::new(
            Arc::clone(&buffer_manager),
            Arc::clone(&pipeline),
            &config.buffering,
        ));
        let controller = Arc::new(AudioStreamController::new(
            Arc::clone(&pipeline),
            catalog,
            Some(Arc::clone(&buffer_manager)),
            config.streaming.clone(),
        ));

        info!(
            cache_dir = %config.cache_dir.display(),
            max_streams = config.streaming.max_concurrent_streams,
            "Engine initialized"
        );

        Ok(Self {
            config,
            pipeline,
            buffer_manager,
            buffer_worker,
            controller,
        })
    }

    /// Start background work
    pub async fn start(&self) {
        self.buffer_worker.start().await;
    }

    /// Stop sessions and background work
    pub async fn shutdown(&self) {
        self.controller.shutdown().await;
        self.buffer_worker.stop().await;
        info!("Engine stopped");
    }
}
