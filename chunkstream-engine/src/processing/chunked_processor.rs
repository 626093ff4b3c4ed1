//! Chunked processing and stitching
//!
//! [`ChunkPipeline`] holds what every processor shares: the cache, the
//! enhancer, and the per-key lock arena. A [`ChunkedAudioProcessor`] is one
//! `(track, preset, intensity)` view over the pipeline plus the retained tail
//! of the last chunk it rendered.
//!
//! **Chunk lifecycle:**
//! 1. Cache lookup under a freshly computed file signature
//! 2. On miss: decode `[k·C − O, (k+1)·C)`, enhance, store
//! 3. Stitch: crossfade the head against the previous chunk's tail and hold
//!    back this chunk's trailing overlap
//!
//! Decode, enhancement and cache I/O run on the blocking pool.

use crate::audio::crossfade::crossfade;
use crate::audio::decoder::SourceDecoder;
use crate::audio::types::PcmBuffer;
use crate::catalog::Track;
use crate::config::StreamingConfig;
use crate::error::{Error, Result};
use crate::processing::cache::{CacheKey, ChunkCache};
use crate::processing::enhancer::Enhancer;
use crate::processing::geometry::ChunkGeometry;
use crate::processing::key_locks::{KeyedGuard, KeyedLocks};
use crate::signature::{FileSignature, FileSignatureService};
use chunkstream_common::StreamType;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a processor renders
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingMode {
    /// Enhanced with `preset` at `intensity`, served through the cache
    Enhanced { preset: String, intensity: f32 },
    /// Source audio as decoded, no cache involvement
    Original,
}

impl ProcessingMode {
    pub fn enhanced(preset: impl Into<String>, intensity: f32) -> Self {
        ProcessingMode::Enhanced {
            preset: preset.into(),
            intensity,
        }
    }

    pub fn stream_type(&self) -> StreamType {
        match self {
            ProcessingMode::Enhanced { .. } => StreamType::Enhanced,
            ProcessingMode::Original => StreamType::Original,
        }
    }

    pub fn preset(&self) -> Option<&str> {
        match self {
            ProcessingMode::Enhanced { preset, .. } => Some(preset),
            ProcessingMode::Original => None,
        }
    }

    pub fn intensity(&self) -> f32 {
        match self {
            ProcessingMode::Enhanced { intensity, .. } => *intensity,
            ProcessingMode::Original => 0.0,
        }
    }
}

/// State shared by every processor
pub struct ChunkPipeline {
    cache: ChunkCache,
    enhancer: Arc<dyn Enhancer>,
    signatures: FileSignatureService,
    locks: KeyedLocks<CacheKey>,
    chunk_secs: f64,
    overlap_secs: f64,
}

impl ChunkPipeline {
    pub fn new(cache: ChunkCache, enhancer: Arc<dyn Enhancer>, streaming: &StreamingConfig) -> Self {
        Self {
            cache,
            enhancer,
            signatures: FileSignatureService,
            locks: KeyedLocks::new(),
            chunk_secs: streaming.chunk_duration_secs,
            overlap_secs: streaming.overlap_secs,
        }
    }

    pub fn cache(&self) -> &ChunkCache {
        &self.cache
    }

    /// Cache keys with a producer in flight
    pub fn keys_in_flight(&self) -> usize {
        self.locks.len()
    }

    /// Open a processor for a track.
    ///
    /// Probes the source for its native format. Frame count comes from the
    /// container when it reports one, otherwise from the catalog duration.
    pub async fn open(
        self: &Arc<Self>,
        track: Track,
        mode: ProcessingMode,
    ) -> Result<ChunkedAudioProcessor> {
        let path = track.filepath.clone();
        let info = tokio::task::spawn_blocking(move || SourceDecoder::probe(&path))
            .await
            .map_err(|e| Error::Internal(format!("Probe task failed: {}", e)))?
            .map_err(|e| Error::ChunkDecode {
                chunk_index: 0,
                reason: e.to_string(),
            })?;

        let geometry = match info.total_frames {
            Some(frames) => {
                ChunkGeometry::new(info.sample_rate, frames, self.chunk_secs, self.overlap_secs)
            }
            None => ChunkGeometry::from_duration(
                info.sample_rate,
                track.duration,
                self.chunk_secs,
                self.overlap_secs,
            ),
        };

        debug!(
            track_id = track.id,
            sample_rate = geometry.sample_rate,
            total_chunks = geometry.total_chunks(),
            "Opened chunk processor"
        );

        Ok(ChunkedAudioProcessor {
            pipeline: Arc::clone(self),
            track,
            mode,
            geometry,
            channels: info.channels,
            tail: None,
        })
    }

    /// Delete every cached chunk of `track` not matching its live signature
    pub fn purge_stale(&self, track: &Track) -> usize {
        let current = self.current_signature(track);
        let removed = self.cache.purge_stale(track.id, &current);
        if removed > 0 {
            info!(track_id = track.id, removed, "Purged stale cache entries");
        }
        removed
    }

    /// Signature of the track's source file as it is now
    pub fn current_signature(&self, track: &Track) -> FileSignature {
        self.signatures.generate(&track.filepath)
    }
}

/// One `(track, preset, intensity)` view with stitching state
pub struct ChunkedAudioProcessor {
    pipeline: Arc<ChunkPipeline>,
    track: Track,
    mode: ProcessingMode,
    geometry: ChunkGeometry,
    channels: u16,
    /// Trailing overlap of the last rendered chunk, with its index
    tail: Option<(usize, PcmBuffer)>,
}

impl ChunkedAudioProcessor {
    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn mode(&self) -> &ProcessingMode {
        &self.mode
    }

    pub fn geometry(&self) -> &ChunkGeometry {
        &self.geometry
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn total_chunks(&self) -> usize {
        self.geometry.total_chunks()
    }

    /// Cache key under the file's current signature; None for passthrough
    pub fn cache_key(&self, chunk_index: usize) -> Option<CacheKey> {
        match &self.mode {
            ProcessingMode::Enhanced { preset, intensity } => Some(CacheKey::new(
                self.track.id,
                preset,
                *intensity,
                chunk_index,
                self.pipeline.current_signature(&self.track),
            )),
            ProcessingMode::Original => None,
        }
    }

    /// Path of the processed chunk, producing it on a cache miss.
    ///
    /// Takes no lock; concurrent callers for the same chunk may both
    /// produce it. Use [`Self::process_chunk_safe`] when that matters.
    pub async fn process_chunk(&self, chunk_index: usize) -> Result<PathBuf> {
        let key = self.require_key(chunk_index)?;
        if let Some(path) = self.pipeline.cache.lookup(&key) {
            debug!(chunk = chunk_index, "Cache hit");
            return Ok(path);
        }
        self.produce(key, None).await
    }

    /// [`Self::process_chunk`] serialized per cache key.
    ///
    /// A caller that finds another producer in flight waits for it and
    /// returns the entry it wrote.
    pub async fn process_chunk_safe(&self, chunk_index: usize) -> Result<PathBuf> {
        let key = self.require_key(chunk_index)?;
        if let Some(path) = self.pipeline.cache.lookup(&key) {
            debug!(chunk = chunk_index, "Cache hit");
            return Ok(path);
        }

        let guard = self.pipeline.locks.lock(key.clone()).await;
        if let Some(path) = self.pipeline.cache.lookup(&key) {
            debug!(chunk = chunk_index, "Cache filled while waiting");
            return Ok(path);
        }
        self.produce(key, Some(guard)).await
    }

    /// Render chunk `k` stitched against the retained tail.
    ///
    /// The returned audio covers exactly the chunk's output range when
    /// chunks are rendered in order.
    pub async fn render_chunk(&mut self, chunk_index: usize) -> Result<PcmBuffer> {
        let chunk = self.load_chunk(chunk_index).await?;
        Ok(self.stitch(chunk_index, chunk))
    }

    /// Drop the retained tail
    pub fn reset_tail(&mut self) {
        self.tail = None;
    }

    pub fn has_tail(&self) -> bool {
        self.tail.is_some()
    }

    /// Remove the cache entry (and any partial write) for a chunk
    pub fn discard_chunk(&self, chunk_index: usize) {
        if let Some(key) = self.cache_key(chunk_index) {
            self.pipeline.cache.discard(&key);
            debug!(chunk = chunk_index, "Discarded cache entry");
        }
    }

    fn require_key(&self, chunk_index: usize) -> Result<CacheKey> {
        self.cache_key(chunk_index).ok_or_else(|| {
            Error::Internal("Passthrough processor has no cached chunks".to_string())
        })
    }

    /// Unstitched chunk audio, head overlap included
    async fn load_chunk(&self, chunk_index: usize) -> Result<PcmBuffer> {
        match &self.mode {
            ProcessingMode::Original => {
                let range = self.geometry.decode_range(chunk_index);
                let path = self.track.filepath.clone();
                tokio::task::spawn_blocking(move || {
                    SourceDecoder::decode_range(&path, range.start, range.end)
                })
                .await
                .map_err(|e| Error::Internal(format!("Decode task failed: {}", e)))?
                .map_err(|e| Error::ChunkDecode {
                    chunk_index,
                    reason: e.to_string(),
                })
            }
            ProcessingMode::Enhanced { .. } => {
                let path = self.process_chunk_safe(chunk_index).await?;
                let cache = self.pipeline.cache.clone();
                let read = tokio::task::spawn_blocking(move || cache.read(&path))
                    .await
                    .map_err(|e| Error::Internal(format!("Cache read task failed: {}", e)))?;

                read.map_err(|reason| {
                    warn!(chunk = chunk_index, "Unreadable cache entry: {}", reason);
                    self.discard_chunk(chunk_index);
                    Error::ChunkDecode {
                        chunk_index,
                        reason: format!("cached chunk unreadable: {}", reason),
                    }
                })
            }
        }
    }

    /// Decode, enhance and store one chunk.
    ///
    /// The key lock moves into the blocking task, so it stays held until the
    /// entry is written even if the caller stops waiting.
    async fn produce(
        &self,
        key: CacheKey,
        guard: Option<KeyedGuard<CacheKey>>,
    ) -> Result<PathBuf> {
        let ProcessingMode::Enhanced { preset, intensity } = &self.mode else {
            return Err(Error::Internal("Passthrough processor cannot produce".to_string()));
        };

        let chunk_index = key.chunk_index;
        let range = self.geometry.decode_range(chunk_index);
        let path = self.track.filepath.clone();
        let preset = preset.clone();
        let intensity = *intensity;
        let pipeline = Arc::clone(&self.pipeline);

        debug!(
            track_id = self.track.id,
            chunk = chunk_index,
            preset = %preset,
            "Producing chunk (frames {}..{})",
            range.start,
            range.end
        );

        tokio::task::spawn_blocking(move || -> Result<PathBuf> {
            let _guard = guard;
            let decoded = SourceDecoder::decode_range(&path, range.start, range.end).map_err(|e| {
                Error::ChunkDecode {
                    chunk_index,
                    reason: e.to_string(),
                }
            })?;

            let samples = pipeline
                .enhancer
                .enhance(&decoded, &preset, intensity)
                .map_err(|e| Error::Enhancement {
                    chunk_index,
                    reason: e.to_string(),
                })?;

            if samples.len() != decoded.samples.len() {
                return Err(Error::Enhancement {
                    chunk_index,
                    reason: format!(
                        "output length {} does not match input length {}",
                        samples.len(),
                        decoded.samples.len()
                    ),
                });
            }

            let enhanced = PcmBuffer::new(samples, decoded.sample_rate, decoded.channels);
            pipeline.cache.store(&key, &enhanced)
        })
        .await
        .map_err(|e| Error::Internal(format!("Chunk task failed: {}", e)))?
    }

    fn stitch(&mut self, chunk_index: usize, chunk: PcmBuffer) -> PcmBuffer {
        let mut out = match self.tail.take() {
            Some((tail_index, tail))
                if tail_index + 1 == chunk_index && tail.channels == chunk.channels =>
            {
                let samples = crossfade(
                    &tail.samples,
                    &chunk.samples,
                    tail.frames(),
                    chunk.channels as usize,
                );
                PcmBuffer::new(samples, chunk.sample_rate, chunk.channels)
            }
            Some((tail_index, _)) => {
                debug!(
                    "Dropping tail of chunk {} (rendering chunk {})",
                    tail_index, chunk_index
                );
                chunk
            }
            None => chunk,
        };

        if !self.geometry.is_last(chunk_index) {
            let tail = out.split_off_tail(self.geometry.overlap_frames as usize);
            self.tail = Some((chunk_index, tail));
        }
        out
    }
}
