//! Shared fixtures: synthetic clips and a tiny in-code classifier
#![allow(dead_code)]

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::f32::consts::PI;
use std::io::Cursor;
use voice_detect_rs::features::{Feature, FEATURE_COUNT, FEATURE_NAMES};
use voice_detect_rs::models::{DecisionTree, RandomForest, StandardScaler, VoiceClassifier};

/// Sine at `freq` Hz with a slow amplitude wobble so frames are not identical
pub fn tone(freq: f32, secs: f32, sample_rate: u32) -> Vec<f32> {
    let n = (secs * sample_rate as f32) as usize;
    (0..n)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let envelope = 0.6 + 0.2 * (2.0 * PI * 3.0 * t).sin();
            envelope * (2.0 * PI * freq * t).sin()
        })
        .collect()
}

/// Deterministic pseudo-random noise in [-amplitude, amplitude]
pub fn noise(secs: f32, sample_rate: u32, amplitude: f32) -> Vec<f32> {
    let n = (secs * sample_rate as f32) as usize;
    let mut state: u32 = 0x1234_5678;
    (0..n)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            amplitude * ((state as f32 / u32::MAX as f32) * 2.0 - 1.0)
        })
        .collect()
}

/// 16-bit PCM WAV bytes; every channel carries the same signal
pub fn wav_bytes(samples: &[f32], sample_rate: u32, channels: u16) -> Vec<u8> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
        for &sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            for _ in 0..channels {
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn wav_base64(samples: &[f32], sample_rate: u32) -> String {
    STANDARD.encode(wav_bytes(samples, sample_rate, 1))
}

/// Two-sided stump on one feature
fn stump(feature: Feature, threshold: f64, left: [f64; 2], right: [f64; 2]) -> DecisionTree {
    DecisionTree {
        children_left: vec![1, -1, -1],
        children_right: vec![2, -1, -1],
        feature: vec![feature.index() as i64, -2, -2],
        threshold: vec![threshold, -2.0, -2.0],
        value: vec![vec![1.0, 1.0], left.to_vec(), right.to_vec()],
    }
}

/// Identity scaler and a two-tree forest voting on pitch variance and
/// energy variation
pub fn classifier() -> VoiceClassifier {
    let names: Vec<String> = FEATURE_NAMES.iter().map(|s| s.to_string()).collect();
    let scaler = StandardScaler {
        feature_names: names.clone(),
        mean: vec![0.0; FEATURE_COUNT],
        scale: vec![1.0; FEATURE_COUNT],
    };

    let mut importances = vec![0.0; FEATURE_COUNT];
    importances[Feature::PitchVariance.index()] = 0.6;
    importances[Feature::EnergyVariation.index()] = 0.4;
    let forest = RandomForest {
        feature_names: names,
        classes: vec![0, 1],
        feature_importances: importances,
        trees: vec![
            stump(Feature::PitchVariance, 500.0, [9.0, 1.0], [2.0, 8.0]),
            stump(Feature::EnergyVariation, 0.5, [7.0, 3.0], [1.0, 9.0]),
        ],
    };

    VoiceClassifier::from_parts(scaler, forest).unwrap()
}

/// 1.8 s MPEG-1 Layer III clip, 32 kHz mono, 50 frames of 288 bytes each
pub const MP3_TONE: &[u8] = include_bytes!("../fixtures/tone_32k_mono.mp3");
pub const MP3_FRAME_BYTES: usize = 288;

pub fn mp3_base64() -> String {
    STANDARD.encode(MP3_TONE)
}
