//! Audio forensic feature extraction
//!
//! Turns a preprocessed 16 kHz waveform into the 22 scalar statistics the
//! classifier was trained on. The order of [`Feature`] is the training order
//! and must never change without retraining.

pub mod pitch;
pub mod spectral;

use crate::dsp::{
    self, fft_frequencies, frame_energies, Dct, MelFilterBank, Stft, FRAME_LENGTH, HOP_LENGTH,
};
use crate::error::{DetectionError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Index;
use strum::{AsRefStr, EnumCount, EnumIter, EnumString, IntoEnumIterator};

/// One named scalar in the feature vector; discriminants are vector positions
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, EnumString, EnumIter, EnumCount,
)]
#[strum(serialize_all = "snake_case")]
pub enum Feature {
    MfccMean,
    MfccStd,
    MfccVar,
    MfccMax,
    MfccMin,
    PitchMean,
    PitchStd,
    PitchVariance,
    PitchRange,
    SpectralFlatnessMean,
    SpectralFlatnessStd,
    SpectralCentroidMean,
    SpectralCentroidStd,
    SpectralRolloffMean,
    SpectralBandwidthMean,
    RmsMean,
    RmsStd,
    RmsVariance,
    ZcrMean,
    ZcrStd,
    EnergyVariation,
    AudioDuration,
}

pub const FEATURE_COUNT: usize = Feature::COUNT;

/// Feature names in training order
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "mfcc_mean",
    "mfcc_std",
    "mfcc_var",
    "mfcc_max",
    "mfcc_min",
    "pitch_mean",
    "pitch_std",
    "pitch_variance",
    "pitch_range",
    "spectral_flatness_mean",
    "spectral_flatness_std",
    "spectral_centroid_mean",
    "spectral_centroid_std",
    "spectral_rolloff_mean",
    "spectral_bandwidth_mean",
    "rms_mean",
    "rms_std",
    "rms_variance",
    "zcr_mean",
    "zcr_std",
    "energy_variation",
    "audio_duration",
];

impl Feature {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        FEATURE_NAMES[self.index()]
    }
}

/// The 22 extracted statistics, stored in training order.
///
/// Serializes as a `name → value` map so stored snapshots stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, f64>",
    into = "BTreeMap<String, f64>"
)]
pub struct AudioFeatures {
    values: [f64; FEATURE_COUNT],
}

impl AudioFeatures {
    /// Build from a vector in training order
    pub fn from_vector(values: &[f64]) -> Result<Self> {
        let values: [f64; FEATURE_COUNT] = values.try_into().map_err(|_| {
            DetectionError::FeatureExtraction(format!(
                "Expected {} feature values, got {}",
                FEATURE_COUNT,
                values.len()
            ))
        })?;
        Ok(Self { values })
    }

    /// Build from a complete `name → value` map
    pub fn from_map(map: &BTreeMap<String, f64>) -> Result<Self> {
        let mut values = [0.0; FEATURE_COUNT];
        for feature in Feature::iter() {
            values[feature.index()] = *map.get(feature.name()).ok_or_else(|| {
                DetectionError::FeatureExtraction(format!("Missing feature '{}'", feature.name()))
            })?;
        }
        Ok(Self { values })
    }

    /// Values in training order, ready for the classifier
    pub fn as_vector(&self) -> &[f64; FEATURE_COUNT] {
        &self.values
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.iter().map(|(f, v)| (f.name().to_string(), v)).collect()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        name.parse::<Feature>().ok().map(|f| self[f])
    }

    pub fn iter(&self) -> impl Iterator<Item = (Feature, f64)> + '_ {
        Feature::iter().map(move |f| (f, self.values[f.index()]))
    }

    fn set(&mut self, feature: Feature, value: f64) {
        self.values[feature.index()] = value;
    }
}

impl Index<Feature> for AudioFeatures {
    type Output = f64;

    fn index(&self, feature: Feature) -> &f64 {
        &self.values[feature.index()]
    }
}

impl TryFrom<BTreeMap<String, f64>> for AudioFeatures {
    type Error = DetectionError;

    fn try_from(map: BTreeMap<String, f64>) -> Result<Self> {
        Self::from_map(&map)
    }
}

impl From<AudioFeatures> for BTreeMap<String, f64> {
    fn from(features: AudioFeatures) -> Self {
        features.to_map()
    }
}

/// Configuration for feature extraction
#[derive(Debug, Clone)]
pub struct FeatureExtractorConfig {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mfcc: usize,
    pub n_mels: usize,
    /// Dynamic range kept in the log-mel spectrogram
    pub top_db: f32,
}

impl Default for FeatureExtractorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            n_fft: FRAME_LENGTH,
            hop_length: HOP_LENGTH,
            n_mfcc: 13,
            n_mels: 128,
            top_db: 80.0,
        }
    }
}

/// Stateless extractor; FFT plan, window, mel bank and DCT basis are
/// precomputed once and shared across requests.
#[derive(Debug)]
pub struct FeatureExtractor {
    config: FeatureExtractorConfig,
    stft: Stft,
    mel_bank: MelFilterBank,
    dct: Dct,
    freqs: Vec<f32>,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(FeatureExtractorConfig::default())
    }
}

impl FeatureExtractor {
    pub fn new(config: FeatureExtractorConfig) -> Self {
        let stft = Stft::new(config.n_fft, config.hop_length);
        let mel_bank = MelFilterBank::new(
            config.sample_rate,
            config.n_fft,
            config.n_mels,
            0.0,
            config.sample_rate as f32 / 2.0,
        );
        let dct = Dct::new(config.n_mels, config.n_mfcc);
        let freqs = fft_frequencies(config.sample_rate, config.n_fft);
        Self {
            config,
            stft,
            mel_bank,
            dct,
            freqs,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    /// Extract all 22 features from a preprocessed waveform
    pub fn extract(&self, samples: &[f32]) -> Result<AudioFeatures> {
        if samples.is_empty() {
            return Err(DetectionError::FeatureExtraction(
                "Cannot extract features from empty audio".to_string(),
            ));
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(DetectionError::FeatureExtraction(
                "Audio contains non-finite samples".to_string(),
            ));
        }

        let spectrogram = self.stft.magnitude(samples);
        let mut features = AudioFeatures {
            values: [0.0; FEATURE_COUNT],
        };

        self.mfcc_features(&spectrogram, &mut features);
        self.pitch_features(&spectrogram, &mut features);
        self.spectral_features(&spectrogram, &mut features);
        self.energy_features(samples, &mut features);
        self.temporal_features(samples, &mut features);

        log::debug!(
            "Extracted {} features from {} samples ({} frames)",
            FEATURE_COUNT,
            samples.len(),
            spectrogram.len()
        );

        Ok(features)
    }

    fn mfcc_features(&self, spectrogram: &[Vec<f32>], out: &mut AudioFeatures) {
        let log_mel: Vec<Vec<f32>> = spectrogram
            .iter()
            .map(|frame| {
                let power: Vec<f32> = frame.iter().map(|m| m * m).collect();
                self.mel_bank
                    .apply(&power)
                    .into_iter()
                    .map(|p| dsp::power_to_db(p, 1.0))
                    .collect()
            })
            .collect();

        // Clamp to top_db below the global peak
        let peak = log_mel
            .iter()
            .flatten()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
        let floor = peak - self.config.top_db;

        let coefficients: Vec<f64> = log_mel
            .iter()
            .flat_map(|frame| {
                let clamped: Vec<f32> = frame.iter().map(|&db| db.max(floor)).collect();
                self.dct.apply(&clamped)
            })
            .map(f64::from)
            .collect();

        let max = coefficients.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = coefficients.iter().copied().fold(f64::INFINITY, f64::min);
        out.set(Feature::MfccMean, dsp::mean(&coefficients));
        out.set(Feature::MfccStd, dsp::std_dev(&coefficients));
        out.set(Feature::MfccVar, dsp::variance(&coefficients));
        out.set(Feature::MfccMax, max);
        out.set(Feature::MfccMin, min);
    }

    fn pitch_features(&self, spectrogram: &[Vec<f32>], out: &mut AudioFeatures) {
        let pitches = pitch::track_pitch(spectrogram, self.config.sample_rate, self.config.n_fft);
        if pitches.is_empty() {
            return;
        }
        let max = pitches.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = pitches.iter().copied().fold(f64::INFINITY, f64::min);
        out.set(Feature::PitchMean, dsp::mean(&pitches));
        out.set(Feature::PitchStd, dsp::std_dev(&pitches));
        out.set(Feature::PitchVariance, dsp::variance(&pitches));
        out.set(Feature::PitchRange, max - min);
    }

    fn spectral_features(&self, spectrogram: &[Vec<f32>], out: &mut AudioFeatures) {
        let frames = spectrogram.len();
        let mut flatness = Vec::with_capacity(frames);
        let mut centroids = Vec::with_capacity(frames);
        let mut rolloffs = Vec::with_capacity(frames);
        let mut bandwidths = Vec::with_capacity(frames);

        for frame in spectrogram {
            let centroid = spectral::centroid(frame, &self.freqs);
            flatness.push(spectral::flatness(frame));
            centroids.push(centroid);
            rolloffs.push(spectral::rolloff(frame, &self.freqs));
            bandwidths.push(spectral::bandwidth(frame, &self.freqs, centroid));
        }

        out.set(Feature::SpectralFlatnessMean, dsp::mean(&flatness));
        out.set(Feature::SpectralFlatnessStd, dsp::std_dev(&flatness));
        out.set(Feature::SpectralCentroidMean, dsp::mean(&centroids));
        out.set(Feature::SpectralCentroidStd, dsp::std_dev(&centroids));
        out.set(Feature::SpectralRolloffMean, dsp::mean(&rolloffs));
        out.set(Feature::SpectralBandwidthMean, dsp::mean(&bandwidths));
    }

    fn energy_features(&self, samples: &[f32], out: &mut AudioFeatures) {
        let to_f64 = |values: Vec<f32>| values.into_iter().map(f64::from).collect::<Vec<_>>();
        let rms = to_f64(dsp::rms(samples, FRAME_LENGTH, self.config.hop_length));
        let zcr = to_f64(dsp::zero_crossing_rate(
            samples,
            FRAME_LENGTH,
            self.config.hop_length,
        ));

        out.set(Feature::RmsMean, dsp::mean(&rms));
        out.set(Feature::RmsStd, dsp::std_dev(&rms));
        out.set(Feature::RmsVariance, dsp::variance(&rms));
        out.set(Feature::ZcrMean, dsp::mean(&zcr));
        out.set(Feature::ZcrStd, dsp::std_dev(&zcr));
    }

    fn temporal_features(&self, samples: &[f32], out: &mut AudioFeatures) {
        let energies = frame_energies(samples, FRAME_LENGTH, self.config.hop_length);
        let variation = dsp::std_dev(&energies) / (dsp::mean(&energies) + 1e-8);

        out.set(Feature::EnergyVariation, variation);
        out.set(
            Feature::AudioDuration,
            samples.len() as f64 / self.config.sample_rate as f64,
        );
    }
}
