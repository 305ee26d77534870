//! Pitch tracking by parabolic interpolation of spectral peaks

/// Lowest frequency considered a pitch candidate
pub const PITCH_FMIN: f32 = 150.0;
/// Highest frequency considered a pitch candidate
pub const PITCH_FMAX: f32 = 4000.0;
/// Peaks below this fraction of the frame maximum are ignored
pub const PITCH_THRESHOLD: f32 = 0.1;

/// Pick one pitch per frame: among the local spectral maxima inside
/// [fmin, fmax) that exceed `threshold × frame max`, refine each by
/// parabolic interpolation and keep the candidate with the largest
/// interpolated magnitude.
///
/// Frames without any candidate are skipped, as are non-positive pitches.
pub fn track_pitch(spectrogram: &[Vec<f32>], sample_rate: u32, n_fft: usize) -> Vec<f64> {
    let fmax = PITCH_FMAX.min(sample_rate as f32 / 2.0);
    let bin_hz = sample_rate as f32 / n_fft as f32;

    spectrogram
        .iter()
        .filter_map(|frame| frame_pitch(frame, bin_hz, PITCH_FMIN, fmax))
        .filter(|&pitch| pitch > 0.0)
        .map(f64::from)
        .collect()
}

fn frame_pitch(frame: &[f32], bin_hz: f32, fmin: f32, fmax: f32) -> Option<f32> {
    let n = frame.len();
    if n < 3 {
        return None;
    }
    let reference = PITCH_THRESHOLD * frame.iter().copied().fold(0.0f32, f32::max);
    let gated = |i: usize| if frame[i] > reference { frame[i] } else { 0.0 };

    let mut best: Option<(f32, f32)> = None; // (magnitude, pitch)
    for i in 1..n - 1 {
        let freq = i as f32 * bin_hz;
        if freq < fmin || freq >= fmax {
            continue;
        }
        let (prev, here, next) = (gated(i - 1), gated(i), gated(i + 1));
        if !(here > prev && here >= next) {
            continue;
        }

        let avg = 0.5 * (frame[i + 1] - frame[i - 1]);
        let curvature = 2.0 * frame[i] - frame[i + 1] - frame[i - 1];
        let shift = if curvature.abs() < f32::MIN_POSITIVE {
            avg
        } else {
            avg / curvature
        };
        let magnitude = frame[i] + 0.5 * avg * shift;
        let pitch = (i as f32 + shift) * bin_hz;

        if best.map_or(true, |(m, _)| magnitude > m) {
            best = Some((magnitude, pitch));
        }
    }
    best.map(|(_, pitch)| pitch)
}
