//! Enhancement capability
//!
//! The mastering DSP lives outside this crate. The engine only needs a
//! synchronous `enhance` call it can run on the blocking pool; it checks
//! that the result keeps the input's length.

use crate::audio::types::PcmBuffer;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnhanceError {
    #[error("Unknown preset '{0}'")]
    UnknownPreset(String),

    #[error("{0}")]
    Failed(String),
}

/// Single-method enhancement capability.
///
/// Called from a blocking thread; implementations may take as long as they
/// need and must return exactly `input.samples.len()` samples.
pub trait Enhancer: Send + Sync + 'static {
    fn enhance(
        &self,
        input: &PcmBuffer,
        preset: &str,
        intensity: f32,
    ) -> Result<Vec<f32>, EnhanceError>;
}

/// Per-preset gain with a tanh soft clip, blended with the dry signal by
/// intensity. Stand-in for the external mastering DSP.
#[derive(Debug, Clone, Default)]
pub struct GainEnhancer;

impl GainEnhancer {
    pub const PRESETS: [(&'static str, f32); 5] = [
        ("adaptive", 1.10),
        ("gentle", 0.90),
        ("warm", 1.05),
        ("bright", 1.20),
        ("punchy", 1.35),
    ];

    fn gain_for(preset: &str) -> Option<f32> {
        Self::PRESETS
            .iter()
            .find(|(name, _)| *name == preset)
            .map(|(_, gain)| *gain)
    }
}

impl Enhancer for GainEnhancer {
    fn enhance(
        &self,
        input: &PcmBuffer,
        preset: &str,
        intensity: f32,
    ) -> Result<Vec<f32>, EnhanceError> {
        let gain =
            Self::gain_for(preset).ok_or_else(|| EnhanceError::UnknownPreset(preset.to_string()))?;
        let wet_mix = intensity.clamp(0.0, 1.0);
        let dry_mix = 1.0 - wet_mix;

        Ok(input
            .samples
            .iter()
            .map(|&s| s * dry_mix + (s * gain).tanh() * wet_mix)
            .collect())
    }
}
