//! Rule-based explanation of a verdict
//!
//! Three independent threshold ladders turn raw feature values into
//! categorical labels a caller can show next to the prediction.

use crate::features::{AudioFeatures, Feature};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MicroVariations {
    Absent,
    Minimal,
    Present,
}

/// Categorical explanation returned alongside every verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub pitch_variance: Level,
    pub spectral_smoothness: Level,
    pub micro_variations: MicroVariations,
}

pub fn categorize_pitch_variance(pitch_variance: f64) -> Level {
    if pitch_variance < 500.0 {
        Level::Low
    } else if pitch_variance < 2000.0 {
        Level::Medium
    } else {
        Level::High
    }
}

/// Flat (noise-like) spectra are rough; low flatness means a smooth spectrum
pub fn categorize_spectral_smoothness(spectral_flatness: f64) -> Level {
    if spectral_flatness < 0.1 {
        Level::High
    } else if spectral_flatness < 0.3 {
        Level::Medium
    } else {
        Level::Low
    }
}

pub fn categorize_micro_variations(energy_variation: f64, zcr_std: f64) -> MicroVariations {
    let score = energy_variation + zcr_std * 10.0;
    if score < 0.5 {
        MicroVariations::Absent
    } else if score < 1.5 {
        MicroVariations::Minimal
    } else {
        MicroVariations::Present
    }
}

/// Explanation from a name → value lookup; missing features read as 0
pub fn explain_with(lookup: impl Fn(Feature) -> Option<f64>) -> Explanation {
    let value = |f: Feature| lookup(f).unwrap_or(0.0);
    Explanation {
        pitch_variance: categorize_pitch_variance(value(Feature::PitchVariance)),
        spectral_smoothness: categorize_spectral_smoothness(value(Feature::SpectralFlatnessMean)),
        micro_variations: categorize_micro_variations(
            value(Feature::EnergyVariation),
            value(Feature::ZcrStd),
        ),
    }
}

pub fn generate_explanation(features: &AudioFeatures) -> Explanation {
    explain_with(|f| Some(features[f]))
}

/// Longer free-text observations, stored with the prediction record
pub fn detailed_insights(features: &AudioFeatures) -> Vec<String> {
    let mut insights = Vec::with_capacity(5);

    let pitch_variance = features[Feature::PitchVariance];
    insights.push(if pitch_variance < 500.0 {
        "Pitch shows minimal natural variation (typical of AI synthesis)"
    } else if pitch_variance > 2000.0 {
        "Pitch exhibits high natural variation (typical of human speech)"
    } else {
        "Pitch variation is moderate"
    });

    let flatness = features[Feature::SpectralFlatnessMean];
    insights.push(if flatness < 0.1 {
        "Spectral content is very smooth (common in AI-generated voices)"
    } else if flatness > 0.3 {
        "Spectral content shows natural roughness (human characteristic)"
    } else {
        "Spectral characteristics are balanced"
    });

    let energy_variation = features[Feature::EnergyVariation];
    if energy_variation < 0.3 {
        insights.push("Energy levels are highly consistent (AI pattern)");
    } else if energy_variation > 1.0 {
        insights.push("Energy levels show natural fluctuation (human pattern)");
    }

    insights.push(if features[Feature::ZcrStd] < 0.01 {
        "Micro-level variations are minimal or absent"
    } else {
        "Micro-level variations are present"
    });

    let mfcc_var = features[Feature::MfccVar];
    if mfcc_var < 50.0 {
        insights.push("Voice timbre is highly uniform (AI indicator)");
    } else if mfcc_var > 150.0 {
        insights.push("Voice timbre shows natural diversity (human indicator)");
    }

    insights.into_iter().map(String::from).collect()
}
