//! Slaney-style mel filter bank and cepstral transform

use super::stft::fft_frequencies;

const F_SP: f32 = 200.0 / 3.0;
const MIN_LOG_HZ: f32 = 1000.0;
const MIN_LOG_MEL: f32 = MIN_LOG_HZ / F_SP;

fn log_step() -> f32 {
    6.4f32.ln() / 27.0
}

/// Hz → mel on the Slaney scale (linear below 1 kHz, logarithmic above)
pub fn hz_to_mel(hz: f32) -> f32 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

pub fn mel_to_hz(mel: f32) -> f32 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Triangular filters with area normalization, one row per mel band
#[derive(Debug, Clone)]
pub struct MelFilterBank {
    weights: Vec<Vec<f32>>,
}

impl MelFilterBank {
    pub fn new(sample_rate: u32, n_fft: usize, n_mels: usize, fmin: f32, fmax: f32) -> Self {
        let fft_freqs = fft_frequencies(sample_rate, n_fft);

        let min_mel = hz_to_mel(fmin);
        let max_mel = hz_to_mel(fmax);
        let mel_points: Vec<f32> = (0..n_mels + 2)
            .map(|i| mel_to_hz(min_mel + (max_mel - min_mel) * i as f32 / (n_mels + 1) as f32))
            .collect();

        let weights = (0..n_mels)
            .map(|m| {
                let (left, center, right) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
                let norm = 2.0 / (right - left);
                fft_freqs
                    .iter()
                    .map(|&f| {
                        let lower = (f - left) / (center - left);
                        let upper = (right - f) / (right - center);
                        lower.min(upper).max(0.0) * norm
                    })
                    .collect()
            })
            .collect();

        Self { weights }
    }

    pub fn n_mels(&self) -> usize {
        self.weights.len()
    }

    /// Project one power-spectrum frame onto the mel bands
    pub fn apply(&self, power_frame: &[f32]) -> Vec<f32> {
        self.weights
            .iter()
            .map(|band| band.iter().zip(power_frame).map(|(w, p)| w * p).sum())
            .collect()
    }
}

/// Orthonormal DCT-II basis, keeping the first `n_out` coefficients
#[derive(Debug, Clone)]
pub struct Dct {
    basis: Vec<Vec<f32>>,
}

impl Dct {
    pub fn new(n_in: usize, n_out: usize) -> Self {
        let n = n_in as f32;
        let basis = (0..n_out)
            .map(|k| {
                let scale = if k == 0 {
                    (1.0 / n).sqrt()
                } else {
                    (2.0 / n).sqrt()
                };
                (0..n_in)
                    .map(|i| {
                        scale
                            * (std::f32::consts::PI * k as f32 * (2.0 * i as f32 + 1.0) / (2.0 * n))
                                .cos()
                    })
                    .collect()
            })
            .collect();
        Self { basis }
    }

    pub fn apply(&self, input: &[f32]) -> Vec<f32> {
        self.basis
            .iter()
            .map(|row| row.iter().zip(input).map(|(b, x)| b * x).sum())
            .collect()
    }
}
