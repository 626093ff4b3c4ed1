//! Deterministic source files for streaming tests
//!
//! Fixtures are mono 32-bit float WAV at a low sample rate so chunk
//! arithmetic stays readable: with 1 s chunks and 0.25 s overlap a 2500
//! frame file is three chunks delivering 750, 1000 and 750 frames.

use chunkstream_engine::catalog::Track;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Fixture sample rate
pub const RATE: u32 = 1000;

fn spec(channels: u16) -> WavSpec {
    WavSpec {
        channels,
        sample_rate: RATE,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    }
}

/// Sample value of the ramp fixture at `frame`.
///
/// Distinct per frame within a chunk so misplaced audio shows up.
pub fn ramp_sample(frame: usize) -> f32 {
    ((frame % 500) as f32 / 500.0) - 0.5
}

/// Mono ramp of `frames` frames
pub fn generate_ramp_wav<P: AsRef<Path>>(path: P, frames: usize) -> Result<(), hound::Error> {
    let mut writer = WavWriter::create(path, spec(1))?;
    for frame in 0..frames {
        writer.write_sample(ramp_sample(frame))?;
    }
    writer.finalize()?;
    Ok(())
}

/// Interleaved stereo with a constant value per channel
pub fn generate_constant_stereo_wav<P: AsRef<Path>>(
    path: P,
    frames: usize,
    left: f32,
    right: f32,
) -> Result<(), hound::Error> {
    let mut writer = WavWriter::create(path, spec(2))?;
    for _ in 0..frames {
        writer.write_sample(left)?;
        writer.write_sample(right)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Catalog entry for a fixture file
pub fn track_for(id: i64, path: PathBuf, frames: usize) -> Track {
    Track {
        id,
        filepath: path,
        duration: frames as f64 / RATE as f64,
        sample_rate: RATE,
    }
}

/// Temporary directory holding a ramp fixture, plus its track
pub fn ramp_track(id: i64, frames: usize) -> (TempDir, Track) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join(format!("track_{}.wav", id));
    generate_ramp_wav(&path, frames).expect("write ramp fixture");
    (dir, track_for(id, path, frames))
}
