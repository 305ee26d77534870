//! Detection pipeline
//!
//! Runs one clip through every stage in order:
//! - base64 decoding, resampling and duration checks
//! - silence trimming and loudness normalization
//! - feature extraction
//! - forest inference
//! - explanation
//!
//! Every stage is CPU bound, so callers on the async runtime should run
//! [`DetectionPipeline::detect`] on the blocking pool.

use crate::audio::{self, AudioDecoder};
use crate::error::{DetectionError, Result};
use crate::explainer::{self, Explanation};
use crate::features::{AudioFeatures, Feature, FeatureExtractor};
use crate::models::{Prediction, VoiceClassifier};
use crate::storage::NewPrediction;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

/// Everything learned about one clip
#[derive(Debug, Clone)]
pub struct DetectionOutcome {
    pub prediction: Prediction,
    pub features: AudioFeatures,
    pub explanation: Explanation,
    pub insights: Vec<String>,
}

impl DetectionOutcome {
    /// Persistable record with duration, class probabilities and insights in
    /// its metadata
    pub fn to_record(&self, user_email: Option<&str>, filename: Option<&str>) -> NewPrediction {
        let probability = |i: usize| self.prediction.probabilities.get(i).copied().unwrap_or(0.0);
        NewPrediction {
            prediction: self.prediction.label,
            confidence: self.prediction.confidence,
            features: self.features.to_map(),
            explanation: self.explanation,
            user_email: user_email.map(str::to_string),
            filename: filename.map(str::to_string),
            metadata: json!({
                "audio_duration": self.features[Feature::AudioDuration],
                "probabilities": {
                    "ai_generated": probability(0),
                    "human": probability(1),
                },
                "detailed_insights": self.insights,
            }),
        }
    }
}

/// Decoder, extractor and classifier bundled for request handlers
#[derive(Debug, Clone)]
pub struct DetectionPipeline {
    decoder: AudioDecoder,
    extractor: Arc<FeatureExtractor>,
    classifier: Arc<VoiceClassifier>,
}

impl DetectionPipeline {
    pub fn new(classifier: Arc<VoiceClassifier>) -> Self {
        let extractor = FeatureExtractor::default();
        Self {
            decoder: AudioDecoder::new(extractor.sample_rate()),
            extractor: Arc::new(extractor),
            classifier,
        }
    }

    pub fn classifier(&self) -> &VoiceClassifier {
        &self.classifier
    }

    /// Decode, validate and preprocess a base64 clip
    pub fn prepare(&self, audio_base64: &str) -> Result<Vec<f32>> {
        let decoded = self.decoder.decode_base64(audio_base64)?;
        log::debug!(
            "Decoded clip: {:.2}s at {}Hz",
            decoded.duration_secs(),
            decoded.sample_rate
        );

        let samples = audio::preprocess(&decoded.samples);
        if samples.is_empty() {
            return Err(DetectionError::ProcessingError(
                "Audio contains no signal after silence trimming".to_string(),
            ));
        }
        Ok(samples)
    }

    /// Classify a preprocessed waveform
    pub fn analyze(&self, samples: &[f32]) -> Result<DetectionOutcome> {
        let features = self.extractor.extract(samples)?;
        let prediction = self.classifier.predict(&features)?;
        let explanation = explainer::generate_explanation(&features);
        let insights = explainer::detailed_insights(&features);
        Ok(DetectionOutcome {
            prediction,
            features,
            explanation,
            insights,
        })
    }

    /// Full run from a base64 payload
    pub fn detect(&self, audio_base64: &str) -> Result<DetectionOutcome> {
        let started = Instant::now();
        let samples = self.prepare(audio_base64)?;
        let outcome = self.analyze(&samples)?;
        log::debug!(
            "Pipeline finished in {:?}: {} ({:.3})",
            started.elapsed(),
            outcome.prediction.label,
            outcome.prediction.confidence
        );
        Ok(outcome)
    }
}
