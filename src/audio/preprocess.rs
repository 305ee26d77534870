use crate::dsp::{self, FRAME_LENGTH, HOP_LENGTH};

/// Frames quieter than this many dB below the loudest frame count as silence
pub const TRIM_TOP_DB: f32 = 20.0;
/// RMS level the trimmed clip is scaled to
pub const TARGET_RMS: f32 = 0.1;

/// Sample range of the clip that is not leading or trailing silence.
///
/// Frame loudness is the centered RMS converted to dB relative to the
/// loudest frame.
pub fn non_silent_range(samples: &[f32], top_db: f32) -> std::ops::Range<usize> {
    let rms = dsp::rms(samples, FRAME_LENGTH, HOP_LENGTH);
    let power: Vec<f32> = rms.iter().map(|r| r * r).collect();
    let reference = power.iter().copied().fold(0.0f32, f32::max);

    let loud = |p: f32| dsp::power_to_db(p, reference) > -top_db;
    let first = power.iter().position(|&p| loud(p));
    let last = power.iter().rposition(|&p| loud(p));

    match (first, last) {
        (Some(first), Some(last)) => {
            let start = (first * HOP_LENGTH).min(samples.len());
            let end = ((last + 1) * HOP_LENGTH).min(samples.len());
            start..end
        }
        _ => 0..0,
    }
}

/// Trim leading and trailing silence
pub fn trim_silence(samples: &[f32], top_db: f32) -> &[f32] {
    &samples[non_silent_range(samples, top_db)]
}

/// Scale the clip so its RMS equals `target`; silent clips are left untouched
pub fn normalize_rms(samples: &mut [f32], target: f32) {
    if samples.is_empty() {
        return;
    }
    let rms = (samples.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>()
        / samples.len() as f64)
        .sqrt() as f32;
    if rms > 0.0 {
        let gain = target / rms;
        samples.iter_mut().for_each(|x| *x *= gain);
    }
}

/// Trim silence then normalize loudness
pub fn preprocess(samples: &[f32]) -> Vec<f32> {
    let mut trimmed = trim_silence(samples, TRIM_TOP_DB).to_vec();
    normalize_rms(&mut trimmed, TARGET_RMS);
    log::debug!(
        "Preprocessed audio: {} samples -> {} samples after trim",
        samples.len(),
        trimmed.len()
    );
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * 440.0 * i as f32 / 16000.0).sin())
            .collect()
    }

    #[test]
    fn test_trim_removes_silent_edges() {
        let mut samples = vec![0.0f32; 16000];
        samples.extend(tone(16000, 0.5));
        samples.extend(vec![0.0f32; 16000]);

        let range = non_silent_range(&samples, TRIM_TOP_DB);
        // Frame resolution is one hop; allow a frame of slack around the tone
        assert!(range.start <= 16000 && range.start >= 16000 - FRAME_LENGTH);
        assert!(range.end >= 32000 && range.end <= 32000 + FRAME_LENGTH);
    }

    #[test]
    fn test_trim_keeps_loud_clip() {
        let samples = tone(16000, 0.5);
        let trimmed = trim_silence(&samples, TRIM_TOP_DB);
        assert!(trimmed.len() >= 16000 - HOP_LENGTH);
    }

    #[test]
    fn test_all_zero_clip_is_kept() {
        // Every frame equals the reference, so nothing is below the threshold
        let samples = vec![0.0f32; 4096];
        assert_eq!(trim_silence(&samples, TRIM_TOP_DB).len(), 4096);
    }

    #[test]
    fn test_normalize_rms() {
        let mut samples = tone(16000, 0.9);
        normalize_rms(&mut samples, TARGET_RMS);
        let rms = (samples.iter().map(|x| x * x).sum::<f32>() / samples.len() as f32).sqrt();
        assert!((rms - TARGET_RMS).abs() < 1e-4);

        let mut silent = vec![0.0f32; 100];
        normalize_rms(&mut silent, TARGET_RMS);
        assert!(silent.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_preprocess_output_level() {
        let mut samples = vec![0.0f32; 8000];
        samples.extend(tone(32000, 0.3));
        let processed = preprocess(&samples);
        assert!(processed.len() < samples.len());
        let rms = (processed.iter().map(|x| x * x).sum::<f32>() / processed.len() as f32).sqrt();
        assert!((rms - TARGET_RMS).abs() < 1e-3);
    }
}
