//! Equal-power crossfade between adjacent chunks
//!
//! `crossfade(a, b, overlap)` returns `a` without its last `overlap` frames,
//! then the blended overlap region, then `b` without its first `overlap`
//! frames. Output length in frames is `len(a) + len(b) - overlap`.
//!
//! The blend weights come from [`EqualPowerFade`]: `cos²θ` on `a`'s tail and
//! `sin²θ` on `b`'s head, θ linearly spaced over `[0, π/2]`. Every channel of
//! a frame uses the same weight.

use chunkstream_common::fade_curves::EqualPowerFade;

/// Crossfade two interleaved buffers with the same channel count.
///
/// `overlap_frames` is clamped to `min(len(a), len(b))`; zero overlap is
/// plain concatenation.
pub fn crossfade(a: &[f32], b: &[f32], overlap_frames: usize, channels: usize) -> Vec<f32> {
    let channels = channels.max(1);
    let frames_a = a.len() / channels;
    let frames_b = b.len() / channels;
    let overlap = overlap_frames.min(frames_a).min(frames_b);

    let mut out = Vec::with_capacity(a.len() + b.len() - overlap * channels);
    let a_body_end = (frames_a - overlap) * channels;
    out.extend_from_slice(&a[..a_body_end]);

    if overlap > 0 {
        let weights = EqualPowerFade.weight_table(overlap);
        let a_tail = &a[a_body_end..a_body_end + overlap * channels];
        let b_head = &b[..overlap * channels];

        for (frame, (w_out, w_in)) in weights.iter().enumerate() {
            let base = frame * channels;
            for ch in 0..channels {
                out.push(a_tail[base + ch] * w_out + b_head[base + ch] * w_in);
            }
        }
    }

    out.extend_from_slice(&b[overlap * channels..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_invariant() {
        let a = vec![0.25f32; 100 * 2];
        let b = vec![0.5f32; 60 * 2];
        for overlap in [0usize, 1, 10, 59, 60] {
            let out = crossfade(&a, &b, overlap, 2);
            assert_eq!(out.len() / 2, 100 + 60 - overlap, "overlap {}", overlap);
        }
    }

    #[test]
    fn test_zero_overlap_is_concatenation() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![4.0, 5.0];
        assert_eq!(crossfade(&a, &b, 0, 1), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_oversized_overlap_is_clamped() {
        let a = vec![1.0f32; 4];
        let b = vec![1.0f32; 10];
        let out = crossfade(&a, &b, 50, 1);
        assert!(!out.is_empty());
        assert_eq!(out.len(), 4 + 10 - 4);
        assert!(out.iter().all(|s| (s - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_constant_amplitude_preserved_at_midpoint() {
        let a = vec![0.8f32; 101];
        let b = vec![0.8f32; 101];
        let out = crossfade(&a, &b, 101, 1);
        assert_eq!(out.len(), 101);
        assert!((out[50] - 0.8).abs() < 1e-5, "midpoint was {}", out[50]);
        assert!(out.iter().all(|s| (s - 0.8).abs() < 1e-5));
    }

    #[test]
    fn test_overlap_endpoints() {
        let a = vec![1.0f32; 10];
        let b = vec![0.0f32; 10];
        let out = crossfade(&a, &b, 5, 1);
        // First overlap sample is all `a`, last is all `b`
        assert!((out[5] - 1.0).abs() < 1e-6);
        assert!(out[9].abs() < 1e-6);
    }

    #[test]
    fn test_multichannel_uses_same_weight_per_frame() {
        // Left = 1.0 → 0.0, right = 0.5 → 0.0
        let a = vec![1.0, 0.5, 1.0, 0.5, 1.0, 0.5];
        let b = vec![0.0; 6];
        let out = crossfade(&a, &b, 3, 2);
        assert_eq!(out.len(), 6);
        for frame in 0..3 {
            let left = out[frame * 2];
            let right = out[frame * 2 + 1];
            assert!((left - 2.0 * right).abs() < 1e-6, "frame {} l={} r={}", frame, left, right);
        }
    }
}
