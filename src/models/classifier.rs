use super::forest::argmax;
use super::{read_artifact, ModelError, RandomForest, StandardScaler, CLASSIFIER_FILE, SCALER_FILE};
use crate::error::Result;
use crate::features::AudioFeatures;
use serde::{Deserialize, Serialize};
use std::path::Path;
use strum::{AsRefStr, Display, EnumString};

/// Verdict for one clip
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
pub enum VoiceLabel {
    #[serde(rename = "AI_GENERATED")]
    #[strum(serialize = "AI_GENERATED")]
    AiGenerated,
    #[serde(rename = "HUMAN")]
    #[strum(serialize = "HUMAN")]
    Human,
}

impl VoiceLabel {
    /// Class 0 is synthetic speech; forests are validated to carry only 0 and 1
    pub fn from_class(class: i64) -> Self {
        if class == 0 {
            VoiceLabel::AiGenerated
        } else {
            VoiceLabel::Human
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: VoiceLabel,
    /// Probability of the predicted class
    pub confidence: f64,
    /// Per-class probabilities in class order
    pub probabilities: Vec<f64>,
}

/// Scaler + forest pair loaded once at startup and shared read-only
#[derive(Debug, Clone)]
pub struct VoiceClassifier {
    scaler: StandardScaler,
    forest: RandomForest,
}

impl VoiceClassifier {
    /// Load both artifacts from `model_dir`
    pub fn load(model_dir: impl AsRef<Path>) -> std::result::Result<Self, ModelError> {
        let dir = model_dir.as_ref();
        log::info!("📦 Loading classifier artifacts from {}", dir.display());

        let scaler: StandardScaler = read_artifact(dir.join(SCALER_FILE))?;
        let forest: RandomForest = read_artifact(dir.join(CLASSIFIER_FILE))?;
        let classifier = Self::from_parts(scaler, forest)?;

        log::info!(
            "✅ Classifier loaded: {} trees, {} features",
            classifier.n_trees(),
            classifier.feature_names().len()
        );
        Ok(classifier)
    }

    pub fn from_parts(
        scaler: StandardScaler,
        forest: RandomForest,
    ) -> std::result::Result<Self, ModelError> {
        scaler.validate()?;
        forest.validate()?;
        Ok(Self { scaler, forest })
    }

    pub fn predict(&self, features: &AudioFeatures) -> Result<Prediction> {
        let scaled = self.scaler.transform(features.as_vector())?;
        let probabilities = self.forest.predict_proba(&scaled)?;
        let best = argmax(&probabilities);
        let label = VoiceLabel::from_class(self.forest.classes[best]);
        let confidence = probabilities[best].clamp(0.0, 1.0);

        log::debug!(
            "Forest vote: {:?} -> {} ({:.3})",
            probabilities,
            label,
            confidence
        );
        Ok(Prediction {
            label,
            confidence,
            probabilities,
        })
    }

    /// Feature importances sorted from most to least important
    pub fn feature_importance(&self) -> Vec<(String, f64)> {
        let mut pairs: Vec<(String, f64)> = self
            .forest
            .feature_names
            .iter()
            .cloned()
            .zip(self.forest.feature_importances.iter().copied())
            .collect();
        pairs.sort_by(|a, b| b.1.total_cmp(&a.1));
        pairs
    }

    pub fn n_trees(&self) -> usize {
        self.forest.n_trees()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.forest.feature_names
    }
}
