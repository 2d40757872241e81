//! Edge fades that keep synthesized segments free of clicks.

use std::f32::consts::PI;

fn fade_len(fade_ms: f32, sample_rate: u32, available: usize) -> usize {
    (((fade_ms / 1000.0) * sample_rate as f32) as usize).min(available)
}

/// Apply a Hann-window fade-in over the first `fade_ms` milliseconds.
pub fn apply_fade_in(samples: &mut [f32], fade_ms: f32, sample_rate: u32) {
    let n = fade_len(fade_ms, sample_rate, samples.len());
    for (i, sample) in samples.iter_mut().take(n).enumerate() {
        let t = i as f32 / n.max(1) as f32;
        *sample *= 0.5 * (1.0 - (PI * t).cos());
    }
}

/// Apply a Hann-window fade-out over the last `fade_ms` milliseconds.
pub fn apply_fade_out(samples: &mut [f32], fade_ms: f32, sample_rate: u32) {
    let n = fade_len(fade_ms, sample_rate, samples.len());
    let start = samples.len() - n;
    for (i, sample) in samples[start..].iter_mut().enumerate() {
        let t = i as f32 / n.max(1) as f32;
        *sample *= 0.5 * (1.0 + (PI * t).cos());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fade_in_starts_silent() {
        let mut samples = vec![1.0f32; 100];
        apply_fade_in(&mut samples, 10.0, 1000);
        assert_eq!(samples[0], 0.0);
        assert!(samples[5] > 0.0 && samples[5] < 1.0);
        assert_eq!(samples[50], 1.0);
    }

    #[test]
    fn test_fade_out_touches_only_tail() {
        let mut samples = vec![1.0f32; 100];
        apply_fade_out(&mut samples, 10.0, 1000);
        assert_eq!(samples[0], 1.0);
        assert_eq!(samples[89], 1.0);
        assert!(samples[99] < 0.1);
    }

    #[test]
    fn test_fade_longer_than_input() {
        let mut samples = vec![1.0f32; 4];
        apply_fade_in(&mut samples, 1000.0, 1000);
        apply_fade_out(&mut samples, 1000.0, 1000);
        assert_eq!(samples[0], 0.0);
    }
}
