//! Source decoder using symphonia
//!
//! Decodes a frame range of a source file to interleaved f32 PCM at the
//! file's native rate and channel count. The reader seeks to the range
//! start; packet timestamps then trim the output to exact frames. Formats
//! that cannot seek are decoded from the top and skipped forward.

use crate::audio::types::PcmBuffer;
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase, TimeStamp};
use thiserror::Error;
use tracing::{debug, warn};

/// Decode failure, mapped to a chunk error by the caller
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to open {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("Unsupported or corrupt stream: {0}")]
    Format(String),

    #[error("Requested range starts at frame {start} beyond end of stream")]
    OutOfRange { start: u64 },
}

/// Stream properties read from the container header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    pub sample_rate: u32,
    pub channels: u16,
    /// Total frames if the container reports them
    pub total_frames: Option<u64>,
}

/// Converts between frame indices and track timestamps
#[derive(Debug, Clone, Copy)]
struct FrameClock {
    time_base: Option<TimeBase>,
    sample_rate: u32,
}

impl FrameClock {
    fn ts_to_frame(&self, ts: TimeStamp) -> u64 {
        match self.time_base {
            Some(tb) if !(tb.numer == 1 && tb.denom == self.sample_rate) => {
                let time = tb.calc_time(ts);
                ((time.seconds as f64 + time.frac) * self.sample_rate as f64).round() as u64
            }
            _ => ts,
        }
    }

    fn frame_to_ts(&self, frame: u64) -> TimeStamp {
        match self.time_base {
            Some(tb) if !(tb.numer == 1 && tb.denom == self.sample_rate) => {
                let seconds = frame / self.sample_rate as u64;
                let frac = (frame % self.sample_rate as u64) as f64 / self.sample_rate as f64;
                tb.calc_timestamp(Time::new(seconds, frac))
            }
            _ => frame,
        }
    }
}

/// Symphonia-backed decoder for source files
pub struct SourceDecoder;

impl SourceDecoder {
    /// Read stream properties without decoding audio
    pub fn probe(path: &Path) -> Result<SourceInfo, DecodeError> {
        let format = Self::open(path)?;
        let track = Self::audio_track(format.as_ref())?;
        let params = &track.codec_params;

        Ok(SourceInfo {
            sample_rate: params
                .sample_rate
                .ok_or_else(|| DecodeError::Format("Sample rate not found".to_string()))?,
            channels: params
                .channels
                .map(|c| c.count() as u16)
                .ok_or_else(|| DecodeError::Format("Channel count not found".to_string()))?,
            total_frames: params.n_frames,
        })
    }

    /// Decode frames `[start_frame, end_frame)` of the file.
    ///
    /// Seeks close to `start_frame` first, then trims to the exact range
    /// using packet timestamps. Returns fewer frames than requested when the
    /// stream ends early.
    pub fn decode_range(
        path: &Path,
        start_frame: u64,
        end_frame: u64,
    ) -> Result<PcmBuffer, DecodeError> {
        debug!(
            "Decoding {} frames {}..{}",
            path.display(),
            start_frame,
            end_frame
        );

        let mut format = Self::open(path)?;
        let track = Self::audio_track(format.as_ref())?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| DecodeError::Format("Sample rate not found".to_string()))?;
        let clock = FrameClock {
            time_base: codec_params.time_base,
            sample_rate,
        };

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Format(format!("Failed to create decoder: {}", e)))?;

        if start_frame > 0 {
            let seek_to = SeekTo::TimeStamp {
                ts: clock.frame_to_ts(start_frame),
                track_id,
            };
            match format.seek(SeekMode::Accurate, seek_to) {
                Ok(seeked) if clock.ts_to_frame(seeked.actual_ts) <= start_frame => {
                    decoder.reset();
                }
                Ok(seeked) => {
                    // Landed past the range start; fall back to decoding from the top
                    debug!(
                        "Seek overshot frame {} (landed at ts {}), rewinding",
                        start_frame, seeked.actual_ts
                    );
                    format = Self::open(path)?;
                    decoder.reset();
                }
                Err(e) => {
                    debug!("Seek unavailable for {}: {}", path.display(), e);
                    format = Self::open(path)?;
                    decoder.reset();
                }
            }
        }

        let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);
        let mut sample_buf: Option<(usize, SampleBuffer<f32>)> = None;
        let mut position: u64 = 0;
        let mut samples = Vec::new();

        while position < end_frame {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(DecodeError::Format(format!("Error reading packet: {}", e))),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    // Recoverable: skip the corrupt packet
                    warn!("Decode error in {}: {}", path.display(), e);
                    continue;
                }
                Err(e) => return Err(DecodeError::Format(format!("Decode failed: {}", e))),
            };

            let spec = *decoded.spec();
            let frames = decoded.frames() as u64;
            channels = spec.channels.count();

            let packet_start = clock.ts_to_frame(packet.ts());
            let packet_end = packet_start + frames;
            position = packet_end;

            if packet_end <= start_frame || frames == 0 {
                continue;
            }

            let capacity = decoded.capacity();
            if sample_buf.as_ref().map_or(true, |(cap, _)| *cap < capacity) {
                sample_buf = Some((capacity, SampleBuffer::new(capacity as u64, spec)));
            }
            let Some((_, buf)) = sample_buf.as_mut() else {
                continue;
            };
            buf.copy_interleaved_ref(decoded);

            let from = start_frame.saturating_sub(packet_start) as usize;
            let to = end_frame.min(packet_end).saturating_sub(packet_start) as usize;
            if from < to {
                samples.extend_from_slice(&buf.samples()[from * channels..to * channels]);
            }
        }

        if samples.is_empty() && start_frame > 0 && position <= start_frame {
            return Err(DecodeError::OutOfRange { start: start_frame });
        }

        Ok(PcmBuffer::new(samples, sample_rate, channels.max(1) as u16))
    }

    fn open(path: &Path) -> Result<Box<dyn FormatReader>, DecodeError> {
        let file = File::open(path).map_err(|e| DecodeError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        // Create a hint to help the format registry guess the format
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| DecodeError::Format(format!("Failed to probe format: {}", e)))?;

        Ok(probed.format)
    }

    fn audio_track(
        format: &dyn FormatReader,
    ) -> Result<&symphonia::core::formats::Track, DecodeError> {
        format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::Format("No audio track found".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};

    fn write_ramp(path: &Path, frames: u32, channels: u16) {
        let spec = WavSpec {
            channels,
            sample_rate: 8000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            for _ in 0..channels {
                writer.write_sample(i as f32 / frames as f32).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_probe_reports_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        write_ramp(&path, 8000, 2);

        let info = SourceDecoder::probe(&path).unwrap();
        assert_eq!(info.sample_rate, 8000);
        assert_eq!(info.channels, 2);
        assert_eq!(info.total_frames, Some(8000));
    }

    #[test]
    fn test_decode_range_is_sample_accurate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        write_ramp(&path, 8000, 2);

        let pcm = SourceDecoder::decode_range(&path, 1000, 3000).unwrap();
        assert_eq!(pcm.frames(), 2000);
        assert_eq!(pcm.channels, 2);
        assert!((pcm.samples[0] - 1000.0 / 8000.0).abs() < 1e-6);
        assert!((pcm.samples[pcm.samples.len() - 1] - 2999.0 / 8000.0).abs() < 1e-6);
    }

    #[test]
    fn test_late_range_is_sample_accurate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.wav");
        write_ramp(&path, 80_000, 1);

        let pcm = SourceDecoder::decode_range(&path, 71_237, 72_000).unwrap();
        assert_eq!(pcm.frames(), 763);
        assert!((pcm.samples[0] - 71_237.0 / 80_000.0).abs() < 1e-6);
        assert!((pcm.samples[762] - 71_999.0 / 80_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_adjacent_ranges_tile_full_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        write_ramp(&path, 20_000, 2);

        let full = SourceDecoder::decode_range(&path, 0, 20_000).unwrap();
        let mut tiled = Vec::new();
        for start in (0..20_000).step_by(3_333) {
            let end = (start + 3_333).min(20_000);
            tiled.extend(SourceDecoder::decode_range(&path, start, end).unwrap().samples);
        }
        assert_eq!(tiled, full.samples);
    }

    #[test]
    fn test_decode_range_truncated_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        write_ramp(&path, 8000, 1);

        let pcm = SourceDecoder::decode_range(&path, 7000, 9000).unwrap();
        assert_eq!(pcm.frames(), 1000);
    }

    #[test]
    fn test_decode_missing_file() {
        let result = SourceDecoder::decode_range(Path::new("/nonexistent/x.wav"), 0, 10);
        assert!(matches!(result, Err(DecodeError::Open { .. })));
    }

    #[test]
    fn test_decode_beyond_end_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        write_ramp(&path, 100, 1);

        let result = SourceDecoder::decode_range(&path, 500, 600);
        assert!(matches!(result, Err(DecodeError::OutOfRange { start: 500 })));
    }
}
