//! Signal-processing primitives shared by preprocessing and feature extraction
//!
//! Conventions follow the usual speech-analysis defaults: 2048-sample frames,
//! 512-sample hop, centered framing, periodic Hann window.

pub mod frames;
pub mod mel;
pub mod stft;

pub use frames::{frame_energies, rms, zero_crossing_rate};
pub use mel::{Dct, MelFilterBank};
pub use stft::{fft_frequencies, Stft};

/// Frame length used by every framed statistic
pub const FRAME_LENGTH: usize = 2048;
/// Hop between consecutive frames
pub const HOP_LENGTH: usize = 512;
/// Floor applied before taking logarithms of power values
pub const AMIN: f32 = 1e-10;

/// Population mean, 0 for empty input
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance (ddof = 0), 0 for empty input
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Convert a power value to decibels relative to `reference`
pub fn power_to_db(power: f32, reference: f32) -> f32 {
    10.0 * power.max(AMIN).log10() - 10.0 * reference.max(AMIN).log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_population_statistics() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&values) - 5.0).abs() < 1e-12);
        assert!((variance(&values) - 4.0).abs() < 1e-12);
        assert!((std_dev(&values) - 2.0).abs() < 1e-12);
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(variance(&[]), 0.0);
    }

    #[test]
    fn test_power_to_db() {
        assert!((power_to_db(1.0, 1.0)).abs() < 1e-6);
        assert!((power_to_db(0.01, 1.0) + 20.0).abs() < 1e-4);
        // Silence is floored at amin instead of producing -inf
        assert!((power_to_db(0.0, 1.0) + 100.0).abs() < 1e-3);
    }
}
