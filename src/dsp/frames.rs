//! Time-domain framing and per-frame statistics

/// How the signal is extended when frames are centered on sample positions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadMode {
    /// Pad with zeros
    Constant,
    /// Repeat the first/last sample
    Edge,
}

/// Pad `frame_length / 2` samples on both sides of the signal
pub fn pad_center(samples: &[f32], frame_length: usize, mode: PadMode) -> Vec<f32> {
    let pad = frame_length / 2;
    let mut padded = Vec::with_capacity(samples.len() + 2 * pad);
    let (head, tail) = match mode {
        PadMode::Constant => (0.0, 0.0),
        PadMode::Edge => (
            samples.first().copied().unwrap_or(0.0),
            samples.last().copied().unwrap_or(0.0),
        ),
    };
    padded.extend(std::iter::repeat(head).take(pad));
    padded.extend_from_slice(samples);
    padded.extend(std::iter::repeat(tail).take(pad));
    padded
}

/// Number of complete frames that fit in `len` samples
pub fn frame_count(len: usize, frame_length: usize, hop_length: usize) -> usize {
    if len < frame_length || hop_length == 0 {
        0
    } else {
        1 + (len - frame_length) / hop_length
    }
}

/// Iterate over complete, non-padded frames
pub fn frames(
    samples: &[f32],
    frame_length: usize,
    hop_length: usize,
) -> impl Iterator<Item = &[f32]> {
    let count = frame_count(samples.len(), frame_length, hop_length);
    (0..count).map(move |i| &samples[i * hop_length..i * hop_length + frame_length])
}

/// Root-mean-square energy per centered frame (zero padded)
pub fn rms(samples: &[f32], frame_length: usize, hop_length: usize) -> Vec<f32> {
    let padded = pad_center(samples, frame_length, PadMode::Constant);
    frames(&padded, frame_length, hop_length)
        .map(|frame| {
            let power = frame.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>()
                / frame_length as f64;
            power.sqrt() as f32
        })
        .collect()
}

/// Samples whose magnitude is at or below this count as zero
const ZERO_CROSSING_THRESHOLD: f32 = 1e-10;

/// Fraction of sign changes per centered frame (edge padded)
pub fn zero_crossing_rate(samples: &[f32], frame_length: usize, hop_length: usize) -> Vec<f32> {
    let padded = pad_center(samples, frame_length, PadMode::Edge);
    frames(&padded, frame_length, hop_length)
        .map(|frame| {
            let negative = |x: f32| x.abs() > ZERO_CROSSING_THRESHOLD && x < 0.0;
            let crossings = frame
                .windows(2)
                .filter(|pair| negative(pair[0]) != negative(pair[1]))
                .count();
            crossings as f32 / frame_length as f32
        })
        .collect()
}

/// Sum of squared samples over complete frames, without padding.
///
/// Signals shorter than one frame are treated as a single frame.
pub fn frame_energies(samples: &[f32], frame_length: usize, hop_length: usize) -> Vec<f64> {
    let energy = |frame: &[f32]| frame.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>();
    if samples.len() < frame_length {
        return if samples.is_empty() {
            Vec::new()
        } else {
            vec![energy(samples)]
        };
    }
    frames(samples, frame_length, hop_length).map(energy).collect()
}
