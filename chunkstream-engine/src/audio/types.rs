//! Core audio data types
//!
//! **Format:**
//! - Samples are f32 (floating point -1.0 to 1.0)
//! - Interleaved by channel: [L, R, L, R, ...] for stereo
//! - Sample rate is the source track's native rate (no resampling)

/// Interleaved PCM audio with its format
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    /// Interleaved samples
    pub samples: Vec<f32>,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Channel count (1 = mono, 2 = stereo, ...)
    pub channels: u16,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Empty buffer with the given format
    pub fn empty(sample_rate: u32, channels: u16) -> Self {
        Self::new(Vec::new(), sample_rate, channels)
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Get duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Split off the last `frames` frames (clamped to the buffer length)
    ///
    /// The returned buffer holds the trailing frames; `self` keeps the rest.
    pub fn split_off_tail(&mut self, frames: usize) -> PcmBuffer {
        let keep = self.frames().saturating_sub(frames);
        let tail = self.samples.split_off(keep * self.channels as usize);
        PcmBuffer::new(tail, self.sample_rate, self.channels)
    }

    /// Iterate over consecutive pieces of at most `frames_per_piece` frames
    pub fn pieces(&self, frames_per_piece: usize) -> impl Iterator<Item = &[f32]> {
        let step = frames_per_piece.max(1) * self.channels.max(1) as usize;
        self.samples.chunks(step)
    }

    /// Number of pieces `pieces(frames_per_piece)` yields
    pub fn piece_count(&self, frames_per_piece: usize) -> usize {
        let per = frames_per_piece.max(1);
        self.frames().div_ceil(per)
    }
}
