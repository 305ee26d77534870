use super::ModelError;
use crate::features::{FEATURE_COUNT, FEATURE_NAMES};
use serde::{Deserialize, Serialize};

/// Standardizes each feature as `(x - mean) / scale`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub feature_names: Vec<String>,
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Check the artifact against the extractor's feature order
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.feature_names.len() != FEATURE_COUNT
            || self.feature_names.iter().zip(FEATURE_NAMES).any(|(a, b)| a != b)
        {
            return Err(ModelError::FeatureMismatch {
                artifact: "feature scaler",
            });
        }
        if self.mean.len() != FEATURE_COUNT || self.scale.len() != FEATURE_COUNT {
            return Err(ModelError::InvalidScaler(format!(
                "expected {} means and scales, got {} and {}",
                FEATURE_COUNT,
                self.mean.len(),
                self.scale.len()
            )));
        }
        if self.mean.iter().chain(&self.scale).any(|v| !v.is_finite()) {
            return Err(ModelError::InvalidScaler(
                "non-finite mean or scale".to_string(),
            ));
        }
        Ok(())
    }

    pub fn transform(&self, values: &[f64]) -> Result<Vec<f64>, ModelError> {
        if values.len() != self.mean.len() {
            return Err(ModelError::InputLength {
                expected: self.mean.len(),
                got: values.len(),
            });
        }
        Ok(values
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(&x, (&mean, &scale))| {
                // Constant features were fitted with scale 0
                let scale = if scale == 0.0 { 1.0 } else { scale };
                (x - mean) / scale
            })
            .collect())
    }
}
