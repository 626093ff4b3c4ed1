//! Chunk boundaries in frames
//!
//! With chunk length `C` and overlap `O` (both in frames), chunk `k` covers
//! the nominal span `[k·C, (k+1)·C)`. It is decoded from `k·C − O` so its
//! head overlaps the previous chunk's last `O` frames. Stitched delivery
//! holds each chunk's last `O` frames back until the next chunk arrives, so
//! chunk `k` delivers `[k·C − O, (k+1)·C − O)` (from 0 for the first chunk,
//! to the end of the track for the last).

use std::ops::Range;

/// Frame geometry of one track at one chunk/overlap setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkGeometry {
    pub sample_rate: u32,
    pub chunk_frames: u64,
    pub overlap_frames: u64,
    pub total_frames: u64,
}

impl ChunkGeometry {
    /// Build from exact frame count.
    ///
    /// Overlap is clamped below the chunk length and the chunk length is at
    /// least one frame.
    pub fn new(sample_rate: u32, total_frames: u64, chunk_secs: f64, overlap_secs: f64) -> Self {
        let chunk_frames = secs_to_frames(chunk_secs, sample_rate).max(1);
        let overlap_frames = secs_to_frames(overlap_secs, sample_rate).min(chunk_frames - 1);
        Self {
            sample_rate,
            chunk_frames,
            overlap_frames,
            total_frames,
        }
    }

    /// Build from a duration in seconds, as reported by the catalog
    pub fn from_duration(
        sample_rate: u32,
        duration_secs: f64,
        chunk_secs: f64,
        overlap_secs: f64,
    ) -> Self {
        Self::new(
            sample_rate,
            secs_to_frames(duration_secs, sample_rate),
            chunk_secs,
            overlap_secs,
        )
    }

    /// `ceil(total / chunk)`; zero for an empty track
    pub fn total_chunks(&self) -> usize {
        self.total_frames.div_ceil(self.chunk_frames) as usize
    }

    pub fn is_last(&self, chunk_index: usize) -> bool {
        chunk_index + 1 >= self.total_chunks()
    }

    /// Source frames to decode for a chunk, head overlap included
    pub fn decode_range(&self, chunk_index: usize) -> Range<u64> {
        let k = chunk_index as u64;
        let start = (k * self.chunk_frames).saturating_sub(self.overlap_frames);
        let end = ((k + 1) * self.chunk_frames).min(self.total_frames);
        start..end.max(start)
    }

    /// Track frames a chunk contributes to stitched output
    pub fn output_range(&self, chunk_index: usize) -> Range<u64> {
        let k = chunk_index as u64;
        let start = (k * self.chunk_frames).saturating_sub(self.overlap_frames);
        let end = if self.is_last(chunk_index) {
            self.total_frames
        } else {
            (k + 1) * self.chunk_frames - self.overlap_frames
        };
        start..end.max(start)
    }

    pub fn frames_to_secs(&self, frames: u64) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        frames as f64 / self.sample_rate as f64
    }

    /// Playback offset where delivered audio ends when chunk `failed_chunk`
    /// could not be produced: the end of chunk `failed_chunk − 1`'s output.
    pub fn recovery_position(&self, failed_chunk: usize) -> f64 {
        self.frames_to_secs(self.output_range(failed_chunk).start)
    }
}

fn secs_to_frames(secs: f64, sample_rate: u32) -> u64 {
    if !(secs > 0.0) {
        return 0;
    }
    (secs * sample_rate as f64).round() as u64
}
