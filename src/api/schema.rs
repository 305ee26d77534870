use crate::explainer::Explanation;
use crate::models::VoiceLabel;
use crate::pipeline::DetectionOutcome;
use crate::storage::{format_timestamp, PredictionRecord, UsageStats, User, UserStats};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const MAX_HISTORY_LIMIT: usize = 500;
pub const DEFAULT_RECENT_LIMIT: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct DetectRequest {
    #[serde(default)]
    pub audio_base64: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectResponse {
    pub prediction: VoiceLabel,
    pub confidence: f64,
    pub explanation: Explanation,
}

impl From<&DetectionOutcome> for DetectResponse {
    fn from(outcome: &DetectionOutcome) -> Self {
        Self {
            prediction: outcome.prediction.label,
            confidence: (outcome.prediction.confidence * 100.0).round() / 100.0,
            explanation: outcome.explanation,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub user_email: String,
    pub api_key: String,
}

impl TokenResponse {
    pub fn bearer(access_token: String, user: &User) -> Self {
        Self {
            access_token,
            token_type: "bearer".to_string(),
            user_email: user.email.clone(),
            api_key: user.api_key.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub email: String,
    pub api_key: String,
    pub created_at: String,
    pub total_requests: i64,
}

impl From<&User> for Profile {
    fn from(user: &User) -> Self {
        Self {
            email: user.email.clone(),
            api_key: user.api_key.clone(),
            created_at: format_timestamp(&user.created_at),
            total_requests: user.total_requests,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    #[serde(flatten)]
    pub stats: UserStats,
    #[serde(flatten)]
    pub usage: UsageStats,
    pub api_key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

impl LimitQuery {
    /// Requested limit, or `default`, clamped to `1..=max`
    pub fn resolve(&self, default: usize, max: usize) -> usize {
        match self.limit {
            Some(limit) => limit.clamp(1, max as i64) as usize,
            None => default,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub record: PredictionRecord,
    pub timestamp_formatted: String,
}

impl From<PredictionRecord> for HistoryEntry {
    fn from(record: PredictionRecord) -> Self {
        let timestamp_formatted = format_timestamp(&record.timestamp);
        Self {
            record,
            timestamp_formatted,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Listing<T> {
    pub total: usize,
    pub predictions: Vec<T>,
}

impl<T> From<Vec<T>> for Listing<T> {
    fn from(predictions: Vec<T>) -> Self {
        Self {
            total: predictions.len(),
            predictions,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureImportance {
    pub name: String,
    pub importance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub n_trees: usize,
    pub feature_names: Vec<String>,
    pub feature_importances: Vec<FeatureImportance>,
}
