//! Per-frame spectral shape descriptors

use crate::dsp::AMIN;

/// Fraction of total magnitude that defines the rolloff frequency
pub const ROLL_PERCENT: f32 = 0.85;

/// Geometric over arithmetic mean of the power spectrum.
///
/// Close to 1 for white noise, close to 0 for pure tones.
pub fn flatness(magnitude_frame: &[f32]) -> f64 {
    if magnitude_frame.is_empty() {
        return 0.0;
    }
    let n = magnitude_frame.len() as f64;
    let (log_sum, sum) = magnitude_frame
        .iter()
        .map(|&m| ((m * m).max(AMIN)) as f64)
        .fold((0.0f64, 0.0f64), |(l, s), p| (l + p.ln(), s + p));
    (log_sum / n).exp() / (sum / n)
}

/// Magnitude-weighted mean frequency
pub fn centroid(magnitude_frame: &[f32], freqs: &[f32]) -> f64 {
    let total: f64 = magnitude_frame.iter().map(|&m| m as f64).sum();
    if total <= f64::from(f32::MIN_POSITIVE) {
        return 0.0;
    }
    magnitude_frame
        .iter()
        .zip(freqs)
        .map(|(&m, &f)| m as f64 * f as f64)
        .sum::<f64>()
        / total
}

/// Lowest bin frequency at which the cumulative magnitude reaches
/// `ROLL_PERCENT` of the frame total
pub fn rolloff(magnitude_frame: &[f32], freqs: &[f32]) -> f64 {
    let total: f64 = magnitude_frame.iter().map(|&m| m as f64).sum();
    let threshold = ROLL_PERCENT as f64 * total;
    let mut cumulative = 0.0f64;
    for (&m, &f) in magnitude_frame.iter().zip(freqs) {
        cumulative += m as f64;
        if cumulative >= threshold {
            return f as f64;
        }
    }
    freqs.last().copied().unwrap_or(0.0) as f64
}

/// Second-order spectral spread around `centroid`
pub fn bandwidth(magnitude_frame: &[f32], freqs: &[f32], centroid: f64) -> f64 {
    let total: f64 = magnitude_frame.iter().map(|&m| m as f64).sum();
    if total <= f64::from(f32::MIN_POSITIVE) {
        return 0.0;
    }
    magnitude_frame
        .iter()
        .zip(freqs)
        .map(|(&m, &f)| {
            let deviation = f as f64 - centroid;
            (m as f64 / total) * deviation * deviation
        })
        .sum::<f64>()
        .sqrt()
}
