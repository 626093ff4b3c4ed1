//! Buffer Manager
//!
//! Tracks which `(track, preset, chunk)` combinations are cached and ready,
//! so the client can switch presets without waiting for processing.
//!
//! **Wanted set:** the first `preload_chunks` chunks of every configured
//! preset for the active track. The buffer worker fills the difference
//! between wanted and ready.
//!
//! Ready marks of a track are only valid for the file signature they were
//! made under; observing a different signature forgets them.

use crate::catalog::Track;
use crate::processing::cache::intensity_to_milli;
use crate::signature::FileSignature;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Ready entry. Intensity is quantized the same way cache keys are.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ReadyKey {
    track_id: i64,
    preset: String,
    chunk_index: usize,
    intensity_milli: u32,
}

/// Track the worker is buffering for
#[derive(Debug, Clone)]
pub struct ActiveTrack {
    pub track: Track,
    pub intensity: f32,
    /// Chunk count, when known, caps the wanted set
    pub total_chunks: Option<usize>,
}

/// Manages the wanted/ready sets for predictive buffering
pub struct BufferManager {
    presets: Vec<String>,
    preload_chunks: usize,
    current: RwLock<Option<ActiveTrack>>,
    ready: RwLock<HashSet<ReadyKey>>,
    /// Signature each track's ready marks belong to
    signatures: RwLock<HashMap<i64, FileSignature>>,
}

impl BufferManager {
    pub fn new(presets: Vec<String>, preload_chunks: usize) -> Self {
        Self {
            presets,
            preload_chunks,
            current: RwLock::new(None),
            ready: RwLock::new(HashSet::new()),
            signatures: RwLock::new(HashMap::new()),
        }
    }

    pub fn presets(&self) -> &[String] {
        &self.presets
    }

    /// Make `track` the active buffering target
    pub async fn set_current_track(&self, track: Track, intensity: f32, total_chunks: Option<usize>) {
        let mut current = self.current.write().await;
        let changed = current
            .as_ref()
            .map_or(true, |a| a.track.id != track.id || a.intensity != intensity);
        if changed {
            info!(
                track_id = track.id,
                intensity,
                "Buffering {} presets x {} chunks",
                self.presets.len(),
                self.preload_chunks
            );
        }
        *current = Some(ActiveTrack {
            track,
            intensity,
            total_chunks,
        });
    }

    /// Stop buffering `track_id` if it is the active target. Ready entries
    /// are kept. Returns true if the target was cleared.
    pub async fn clear_current_track(&self, track_id: i64) -> bool {
        let mut current = self.current.write().await;
        if current.as_ref().is_some_and(|a| a.track.id == track_id) {
            *current = None;
            debug!(track_id, "Buffering target cleared");
            true
        } else {
            false
        }
    }

    pub async fn current_track(&self) -> Option<ActiveTrack> {
        self.current.read().await.clone()
    }

    /// Missing chunks per preset; presets with nothing missing are omitted
    pub async fn get_needed_chunks(
        &self,
        track_id: i64,
        intensity: f32,
    ) -> BTreeMap<String, BTreeSet<usize>> {
        let limit = {
            let current = self.current.read().await;
            match current.as_ref() {
                Some(active) if active.track.id == track_id => active
                    .total_chunks
                    .map_or(self.preload_chunks, |total| total.min(self.preload_chunks)),
                _ => self.preload_chunks,
            }
        };

        let intensity_milli = intensity_to_milli(intensity);
        let ready = self.ready.read().await;

        let mut needed = BTreeMap::new();
        for preset in &self.presets {
            let missing: BTreeSet<usize> = (0..limit)
                .filter(|&chunk_index| {
                    !ready.contains(&ReadyKey {
                        track_id,
                        preset: preset.clone(),
                        chunk_index,
                        intensity_milli,
                    })
                })
                .collect();
            if !missing.is_empty() {
                needed.insert(preset.clone(), missing);
            }
        }
        needed
    }

    /// Record a cached chunk. Idempotent.
    pub async fn mark_chunk_ready(&self, track_id: i64, preset: &str, chunk_index: usize, intensity: f32) {
        let inserted = self.ready.write().await.insert(ReadyKey {
            track_id,
            preset: preset.to_string(),
            chunk_index,
            intensity_milli: intensity_to_milli(intensity),
        });
        if inserted {
            debug!(track_id, preset, chunk_index, "Chunk ready");
        }
    }

    /// True if the chunk is ready. For the active track this means at the
    /// target intensity, otherwise at any intensity.
    pub async fn is_chunk_buffered(&self, track_id: i64, preset: &str, chunk_index: usize) -> bool {
        let target_intensity = self
            .current
            .read()
            .await
            .as_ref()
            .filter(|a| a.track.id == track_id)
            .map(|a| intensity_to_milli(a.intensity));

        self.ready.read().await.iter().any(|key| {
            key.track_id == track_id
                && key.chunk_index == chunk_index
                && key.preset == preset
                && target_intensity.map_or(true, |milli| key.intensity_milli == milli)
        })
    }

    /// Record the signature ready marks of `track_id` refer to.
    ///
    /// If it differs from the one previously seen, the track's ready marks
    /// describe cache entries that are now stale and are forgotten. Returns
    /// true in that case.
    pub async fn observe_signature(&self, track_id: i64, signature: &FileSignature) -> bool {
        let previous = self
            .signatures
            .write()
            .await
            .insert(track_id, signature.clone());

        match previous {
            Some(previous) if previous != *signature => {
                info!(
                    track_id,
                    old = %previous,
                    new = %signature,
                    "Source file changed, forgetting buffered chunks"
                );
                self.forget_track(track_id).await;
                true
            }
            _ => false,
        }
    }

    /// Forget every ready entry of a track (its cache was invalidated)
    pub async fn forget_track(&self, track_id: i64) {
        self.ready.write().await.retain(|key| key.track_id != track_id);
    }
}
