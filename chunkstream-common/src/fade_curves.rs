//! Equal-power fade curves for chunk stitching
//!
//! The curve pair is `fade_out(t) = cos(t × π/2)` and `fade_in(t) = sin(t × π/2)`,
//! so `fade_out² + fade_in² = 1` at every position. Stitching applies the
//! squared curves as mixing weights (`cos²θ` on the outgoing tail, `sin²θ` on
//! the incoming head), which sum to exactly one and keep a constant-amplitude
//! signal at its original level through the whole overlap.

use std::f32::consts::FRAC_PI_2;

/// Equal-power fade curve pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EqualPowerFade;

impl EqualPowerFade {
    /// Fade-in curve value at normalized position (0.0 to 1.0)
    pub fn fade_in(&self, position: f32) -> f32 {
        (position.clamp(0.0, 1.0) * FRAC_PI_2).sin()
    }

    /// Fade-out curve value at normalized position (0.0 to 1.0)
    pub fn fade_out(&self, position: f32) -> f32 {
        (position.clamp(0.0, 1.0) * FRAC_PI_2).cos()
    }

    /// Normalized position of sample `index` in an overlap of `len` samples.
    ///
    /// Positions are linearly spaced with both endpoints included, so the first
    /// sample is 0.0 and the last is 1.0. A single-sample overlap sits at 0.0.
    pub fn position(index: usize, len: usize) -> f32 {
        if len <= 1 {
            0.0
        } else {
            index as f32 / (len - 1) as f32
        }
    }

    /// Mixing weights `(outgoing, incoming)` at a normalized position.
    ///
    /// Weights are the squared curves: `(cos²θ, sin²θ)`.
    pub fn weights(&self, position: f32) -> (f32, f32) {
        let out = self.fade_out(position);
        let inc = self.fade_in(position);
        (out * out, inc * inc)
    }

    /// Precompute mixing weights for an overlap of `len` samples.
    pub fn weight_table(&self, len: usize) -> Vec<(f32, f32)> {
        (0..len)
            .map(|i| self.weights(Self::position(i, len)))
            .collect()
    }
}
