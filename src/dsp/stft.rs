use super::frames::{frames, pad_center, PadMode};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Short-time Fourier transform with a fixed size and window.
///
/// The FFT plan and window are built once and reused for every clip.
pub struct Stft {
    n_fft: usize,
    hop_length: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for Stft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stft")
            .field("n_fft", &self.n_fft)
            .field("hop_length", &self.hop_length)
            .finish()
    }
}

impl Stft {
    pub fn new(n_fft: usize, hop_length: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n_fft);
        Self {
            n_fft,
            hop_length,
            window: hann_window(n_fft),
            fft,
        }
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    /// Number of frequency bins per frame (`n_fft / 2 + 1`)
    pub fn bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Magnitude spectrogram, one row of `bins()` values per centered frame
    pub fn magnitude(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let padded = pad_center(samples, self.n_fft, PadMode::Constant);
        let bins = self.bins();
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.n_fft];
        let mut scratch = vec![Complex::new(0.0f32, 0.0); self.fft.get_inplace_scratch_len()];

        frames(&padded, self.n_fft, self.hop_length)
            .map(|frame| {
                for ((slot, &sample), &w) in buffer.iter_mut().zip(frame).zip(&self.window) {
                    *slot = Complex::new(sample * w, 0.0);
                }
                self.fft.process_with_scratch(&mut buffer, &mut scratch);
                buffer[..bins].iter().map(|c| c.norm()).collect()
            })
            .collect()
    }
}

/// Periodic Hann window of length `n`
pub fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / n as f32).cos())
        .collect()
}

/// Center frequency in Hz of each STFT bin
pub fn fft_frequencies(sample_rate: u32, n_fft: usize) -> Vec<f32> {
    (0..=n_fft / 2)
        .map(|k| k as f32 * sample_rate as f32 / n_fft as f32)
        .collect()
}
