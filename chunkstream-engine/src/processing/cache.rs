//! On-disk cache of processed chunks
//!
//! Layout: `<root>/track_<id>/<preset>_i<intensity‰>_c<chunk>_<signature>.wav`
//!
//! Each entry is the enhanced, overlap-extended chunk (crossfade-ready) as a
//! 32-bit float WAV. A lookup whose signature differs from the live file's is
//! a miss, and the stale sibling entries are deleted when detected.
//!
//! Writes go to `<name>.partial` and are renamed into place, so a file under
//! the final name is always complete. Reads take no lock.

use crate::audio::types::PcmBuffer;
use crate::error::{Error, Result};
use crate::signature::FileSignature;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CHUNK_EXTENSION: &str = "wav";
const PARTIAL_SUFFIX: &str = ".partial";
const PRESET_DIGEST_LEN: usize = 6;

/// Identifies one processed chunk on disk
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub track_id: i64,
    pub preset: String,
    /// Intensity in thousandths (0.75 → 750), so keys hash exactly
    pub intensity_milli: u32,
    pub chunk_index: usize,
    pub signature: FileSignature,
}

impl CacheKey {
    pub fn new(
        track_id: i64,
        preset: &str,
        intensity: f32,
        chunk_index: usize,
        signature: FileSignature,
    ) -> Self {
        Self {
            track_id,
            preset: preset.to_string(),
            intensity_milli: intensity_to_milli(intensity),
            chunk_index,
            signature,
        }
    }

    /// File name prefix shared by every signature of this chunk
    fn prefix(&self) -> String {
        format!(
            "{}_i{:04}_c{:05}_",
            sanitize(&self.preset),
            self.intensity_milli,
            self.chunk_index
        )
    }

    fn file_name(&self) -> String {
        format!("{}{}.{}", self.prefix(), self.signature, CHUNK_EXTENSION)
    }
}

/// Quantize intensity to thousandths
pub fn intensity_to_milli(intensity: f32) -> u32 {
    (intensity.clamp(0.0, 1.0) * 1000.0).round() as u32
}

/// File-name form of a preset.
///
/// Names made of ASCII alphanumerics and `-` are used as-is. Anything else
/// is mapped to that alphabet and tagged with a digest of the raw name, so
/// distinct presets never share entries.
fn sanitize(preset: &str) -> String {
    let conforming = !preset.is_empty()
        && preset.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if conforming {
        return preset.to_string();
    }

    let mapped: String = preset
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    let digest = format!("{:x}", Sha256::digest(preset.as_bytes()));
    format!("{}~{}", mapped, &digest[..PRESET_DIGEST_LEN])
}

/// Signature-keyed chunk store rooted at a directory
#[derive(Debug, Clone)]
pub struct ChunkCache {
    root: PathBuf,
}

impl ChunkCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn track_dir(&self, track_id: i64) -> PathBuf {
        self.root.join(format!("track_{}", track_id))
    }

    /// Path an entry lives at (whether or not it exists)
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.track_dir(key.track_id).join(key.file_name())
    }

    fn partial_path_for(&self, key: &CacheKey) -> PathBuf {
        self.track_dir(key.track_id)
            .join(format!("{}{}", key.file_name(), PARTIAL_SUFFIX))
    }

    /// Path of a valid entry, or None.
    ///
    /// On a miss, entries for the same chunk under any other signature are
    /// stale and get deleted.
    pub fn lookup(&self, key: &CacheKey) -> Option<PathBuf> {
        let path = self.path_for(key);
        if path.is_file() {
            return Some(path);
        }
        // A concurrent writer may rename the current entry into place mid-scan
        let current = key.file_name();
        let prefix = key.prefix();
        let removed = self.remove_matching(key.track_id, |name| {
            name.starts_with(&prefix) && name != current && !name.ends_with(PARTIAL_SUFFIX)
        });
        if removed > 0 {
            info!(
                track_id = key.track_id,
                chunk = key.chunk_index,
                removed,
                "Removed stale cache entries (source file changed)"
            );
        }
        None
    }

    /// Write a processed chunk and return its final path.
    ///
    /// Blocking; call from a blocking context.
    pub fn store(&self, key: &CacheKey, pcm: &PcmBuffer) -> Result<PathBuf> {
        let final_path = self.path_for(key);
        let partial_path = self.partial_path_for(key);

        let result = self.write_wav(&partial_path, pcm).and_then(|_| {
            std::fs::rename(&partial_path, &final_path).map_err(|e| Error::CacheWrite {
                path: final_path.clone(),
                reason: e.to_string(),
            })
        });

        match result {
            Ok(()) => {
                debug!("Cached chunk {} at {}", key.chunk_index, final_path.display());
                Ok(final_path)
            }
            Err(e) => {
                remove_if_exists(&partial_path);
                Err(e)
            }
        }
    }

    fn write_wav(&self, path: &Path, pcm: &PcmBuffer) -> Result<()> {
        let cache_err = |reason: String| Error::CacheWrite {
            path: path.to_path_buf(),
            reason,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| cache_err(e.to_string()))?;
        }

        let spec = WavSpec {
            channels: pcm.channels,
            sample_rate: pcm.sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(path, spec).map_err(|e| cache_err(e.to_string()))?;
        for &sample in &pcm.samples {
            writer
                .write_sample(sample)
                .map_err(|e| cache_err(e.to_string()))?;
        }
        writer.finalize().map_err(|e| cache_err(e.to_string()))
    }

    /// Read a cached chunk. Blocking.
    pub fn read(&self, path: &Path) -> std::result::Result<PcmBuffer, String> {
        let reader = WavReader::open(path).map_err(|e| e.to_string())?;
        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Float || spec.bits_per_sample != 32 {
            return Err(format!("unexpected cache sample format {:?}", spec));
        }
        let samples = reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|e| e.to_string())?;
        Ok(PcmBuffer::new(samples, spec.sample_rate, spec.channels))
    }

    /// Remove an entry and any partial write for it
    pub fn discard(&self, key: &CacheKey) {
        remove_if_exists(&self.partial_path_for(key));
        remove_if_exists(&self.path_for(key));
    }

    /// Delete every entry of a track whose signature is not `current`.
    /// Returns the number of files removed.
    pub fn purge_stale(&self, track_id: i64, current: &FileSignature) -> usize {
        let suffix = format!("_{}.{}", current, CHUNK_EXTENSION);
        self.remove_matching(track_id, |name| {
            !name.ends_with(&suffix) && !name.ends_with(PARTIAL_SUFFIX)
        })
    }

    fn remove_matching(&self, track_id: i64, matches: impl Fn(&str) -> bool) -> usize {
        let dir = self.track_dir(track_id);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if matches(name) && remove_if_exists(&entry.path()) {
                removed += 1;
            }
        }
        removed
    }
}

/// Remove a file, treating "already gone" as success. True if a file was removed.
fn remove_if_exists(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Failed to remove cache file {}: {}", path.display(), e);
            false
        }
    }
}
