//! Fitted model artifacts and inference
//!
//! Two JSON artifacts are loaded from the model directory at startup:
//! `feature_scaler.json` (a standard scaler) and `voice_classifier.json`
//! (a random forest exported as flat per-tree node arrays).

pub mod classifier;
pub mod forest;
pub mod scaler;

pub use classifier::{Prediction, VoiceClassifier, VoiceLabel};
pub use forest::{DecisionTree, RandomForest};
pub use scaler::StandardScaler;

use crate::error::DetectionError;
use std::path::PathBuf;
use thiserror::Error;

/// Scaler artifact file name inside the model directory
pub const SCALER_FILE: &str = "feature_scaler.json";
/// Forest artifact file name inside the model directory
pub const CLASSIFIER_FILE: &str = "voice_classifier.json";

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{artifact} was fitted on a different feature order")]
    FeatureMismatch { artifact: &'static str },

    #[error("Invalid scaler: {0}")]
    InvalidScaler(String),

    #[error("Invalid tree {index}: {reason}")]
    InvalidTree { index: usize, reason: String },

    #[error("Invalid forest: {0}")]
    InvalidForest(String),

    #[error("Expected {expected} features, got {got}")]
    InputLength { expected: usize, got: usize },
}

impl From<ModelError> for DetectionError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::InputLength { .. } => DetectionError::Prediction(err.to_string()),
            other => DetectionError::ModelLoadError(other.to_string()),
        }
    }
}

/// Read and parse one JSON artifact
pub(crate) fn read_artifact<T: serde::de::DeserializeOwned>(
    path: PathBuf,
) -> std::result::Result<T, ModelError> {
    if !path.exists() {
        return Err(ModelError::NotFound(path));
    }
    let raw = std::fs::read_to_string(&path).map_err(|source| ModelError::Io {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ModelError::Parse { path, source })
}
