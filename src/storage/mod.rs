//! Persistence of users, predictions and API usage
//!
//! Every backend implements [`Store`]. The HTTP layer only talks to the
//! [`Database`] handle, which keeps the service answering when the backend is
//! missing or failing: writes are logged and dropped, reads fall back to
//! empty aggregates.

#[cfg(test)]
pub(crate) mod contract;
pub mod memory;

#[cfg(feature = "firebase")]
pub mod firestore;
#[cfg(feature = "mongo")]
pub mod mongo;

pub use memory::MemoryStore;

use crate::config::{DatabaseConfig, DbBackend};
use crate::explainer::Explanation;
use crate::models::VoiceLabel;
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Display format for timestamps in API responses
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Newest records compared when computing a user's trend
pub const TREND_WINDOW: usize = 10;
const TREND_MARGIN: f64 = 0.05;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Duplicate record: {0}")]
    Duplicate(String),
    #[error("Database is not available")]
    Unavailable,
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Malformed record: {0}")]
    Malformed(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub api_key: String,
    pub created_at: DateTime<Utc>,
    pub total_requests: i64,
}

/// Prediction about to be persisted; the store assigns id and timestamp
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewPrediction {
    pub prediction: VoiceLabel,
    pub confidence: f64,
    pub features: BTreeMap<String, f64>,
    pub explanation: Explanation,
    pub user_email: Option<String>,
    pub filename: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub prediction: VoiceLabel,
    pub confidence: f64,
    pub features: BTreeMap<String, f64>,
    pub explanation: Explanation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl PredictionRecord {
    pub fn from_new(id: String, timestamp: DateTime<Utc>, new: &NewPrediction) -> Self {
        Self {
            id,
            timestamp,
            prediction: new.prediction,
            confidence: new.confidence,
            features: new.features.clone(),
            explanation: new.explanation,
            user_email: new.user_email.clone(),
            filename: new.filename.clone(),
            metadata: new.metadata.clone(),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UsageStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLogEntry {
    pub id: String,
    pub user_email: String,
    pub endpoint: String,
    pub status: UsageStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_predictions: u64,
    pub ai_generated_count: u64,
    pub human_count: u64,
    pub average_confidence: f64,
}

impl GlobalStats {
    pub fn new(total: u64, ai: u64, human: u64, average_confidence: f64) -> Self {
        Self {
            total_predictions: total,
            ai_generated_count: ai,
            human_count: human,
            average_confidence: round3(average_confidence),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display)]
pub enum Trend {
    Improving,
    Declining,
    Stable,
    #[serde(rename = "No data")]
    #[strum(serialize = "No data")]
    NoData,
}

/// Compare the mean confidence of the five newest records with the five
/// before them. `confidences` is newest first.
pub fn compute_trend(confidences: &[f64]) -> Trend {
    if confidences.is_empty() {
        return Trend::NoData;
    }
    if confidences.len() < TREND_WINDOW {
        return Trend::Stable;
    }
    let half = TREND_WINDOW / 2;
    let recent = confidences[..half].iter().sum::<f64>() / half as f64;
    let previous = confidences[half..TREND_WINDOW].iter().sum::<f64>() / half as f64;

    if recent > previous + TREND_MARGIN {
        Trend::Improving
    } else if recent < previous - TREND_MARGIN {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastPrediction {
    pub prediction: VoiceLabel,
    pub confidence: f64,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub total_tests: u64,
    pub ai_count: u64,
    pub human_count: u64,
    pub avg_confidence: f64,
    pub last_prediction: Option<LastPrediction>,
    pub trend: Trend,
}

impl Default for UserStats {
    fn default() -> Self {
        Self {
            total_tests: 0,
            ai_count: 0,
            human_count: 0,
            avg_confidence: 0.0,
            last_prediction: None,
            trend: Trend::NoData,
        }
    }
}

impl UserStats {
    /// Assemble from counts plus the user's newest records (newest first)
    pub fn from_parts(
        total: u64,
        ai_count: u64,
        human_count: u64,
        avg_confidence: f64,
        newest: &[PredictionRecord],
    ) -> Self {
        if total == 0 {
            return Self::default();
        }
        let confidences: Vec<f64> = newest.iter().map(|r| r.confidence).collect();
        Self {
            total_tests: total,
            ai_count,
            human_count,
            avg_confidence: round3(avg_confidence),
            last_prediction: newest.first().map(|r| LastPrediction {
                prediction: r.prediction,
                confidence: r.confidence,
                timestamp: format_timestamp(&r.timestamp),
            }),
            trend: compute_trend(&confidences),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub requests_today: u64,
    pub total_requests: u64,
}

pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// 00:00 UTC of the current day
pub fn start_of_today() -> DateTime<Utc> {
    Utc::now()
        .date_naive()
        .and_time(NaiveTime::MIN)
        .and_utc()
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Backend name for logs
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> StoreResult<()>;

    /// Insert a new user; an existing email yields [`StoreError::Duplicate`]
    async fn create_user(&self, email: &str, password_hash: &str, api_key: &str)
        -> StoreResult<User>;

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn user_by_api_key(&self, api_key: &str) -> StoreResult<Option<User>>;

    /// Append a prediction, returning its id
    async fn log_prediction(&self, prediction: &NewPrediction) -> StoreResult<String>;

    /// Newest first across all users
    async fn recent_predictions(&self, limit: usize) -> StoreResult<Vec<PredictionRecord>>;

    async fn statistics(&self) -> StoreResult<GlobalStats>;

    /// Newest first
    async fn user_history(&self, email: &str, limit: usize)
        -> StoreResult<Vec<PredictionRecord>>;

    async fn user_stats(&self, email: &str) -> StoreResult<UserStats>;

    /// Append a usage entry and bump the user's `total_requests` counter
    async fn log_api_usage(
        &self,
        email: &str,
        endpoint: &str,
        status: UsageStatus,
    ) -> StoreResult<String>;

    async fn usage_stats(&self, email: &str) -> StoreResult<UsageStats>;
}

/// Build the backend selected by configuration. `None` means persistence is
/// switched off.
pub async fn open_store(config: &DatabaseConfig) -> StoreResult<Option<Arc<dyn Store>>> {
    let store: Arc<dyn Store> = match config.backend {
        DbBackend::None => return Ok(None),
        DbBackend::Memory => Arc::new(MemoryStore::new()),
        #[cfg(feature = "mongo")]
        DbBackend::Mongo => {
            Arc::new(mongo::MongoStore::connect(&config.mongodb_uri, &config.mongodb_database).await?)
        }
        #[cfg(not(feature = "mongo"))]
        DbBackend::Mongo => {
            return Err(StoreError::Config(
                "built without the `mongo` feature".to_string(),
            ))
        }
        #[cfg(feature = "firebase")]
        DbBackend::Firebase => Arc::new(firestore::FirestoreStore::connect(&config.firebase).await?),
        #[cfg(not(feature = "firebase"))]
        DbBackend::Firebase => {
            return Err(StoreError::Config(
                "built without the `firebase` feature".to_string(),
            ))
        }
    };
    store.ping().await?;
    Ok(Some(store))
}

/// Optional store with log-and-continue semantics
#[derive(Clone, Default)]
pub struct Database {
    store: Option<Arc<dyn Store>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("backend", &self.store.as_ref().map(|s| s.backend()))
            .finish()
    }
}

impl Database {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store: Some(store) }
    }

    pub fn disabled() -> Self {
        Self { store: None }
    }

    /// Connect to the configured backend; failures leave the service running
    /// without persistence
    pub async fn connect(config: &DatabaseConfig) -> Self {
        match open_store(config).await {
            Ok(Some(store)) => {
                log::info!("✅ Database connected ({})", store.backend());
                Self::new(store)
            }
            Ok(None) => {
                log::info!("Persistence disabled (DB_BACKEND=none)");
                Self::disabled()
            }
            Err(e) => {
                log::warn!(
                    "⚠️ Database connection failed ({}): predictions will not be logged",
                    e
                );
                Self::disabled()
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.store.is_some()
    }

    fn store(&self) -> StoreResult<&Arc<dyn Store>> {
        self.store.as_ref().ok_or(StoreError::Unavailable)
    }

    pub async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        api_key: &str,
    ) -> StoreResult<User> {
        self.store()?.create_user(email, password_hash, api_key).await
    }

    pub async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.store()?.user_by_email(email).await
    }

    /// Unknown keys, lookup failures and a missing store all read as `None`
    pub async fn user_by_api_key(&self, api_key: &str) -> Option<User> {
        let store = self.store.as_ref()?;
        match store.user_by_api_key(api_key).await {
            Ok(user) => user,
            Err(e) => {
                log::error!("API key lookup failed: {}", e);
                None
            }
        }
    }

    pub async fn log_prediction(&self, prediction: NewPrediction) -> Option<String> {
        let Some(store) = &self.store else {
            log::warn!("Database not connected, skipping prediction log");
            return None;
        };
        match store.log_prediction(&prediction).await {
            Ok(id) => {
                log::info!("💾 Logged prediction with ID: {}", id);
                Some(id)
            }
            Err(e) => {
                log::error!("Failed to log prediction: {}", e);
                None
            }
        }
    }

    pub async fn log_api_usage(&self, email: &str, endpoint: &str, status: UsageStatus) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.log_api_usage(email, endpoint, status).await {
            log::error!("Failed to log API usage for {}: {}", email, e);
        }
    }

    pub async fn recent_predictions(&self, limit: usize) -> Vec<PredictionRecord> {
        match &self.store {
            Some(store) => or_default("recent predictions", store.recent_predictions(limit).await),
            None => Vec::new(),
        }
    }

    pub async fn statistics(&self) -> GlobalStats {
        match &self.store {
            Some(store) => or_default("statistics", store.statistics().await),
            None => GlobalStats::default(),
        }
    }

    pub async fn user_history(&self, email: &str, limit: usize) -> Vec<PredictionRecord> {
        match &self.store {
            Some(store) => or_default("user history", store.user_history(email, limit).await),
            None => Vec::new(),
        }
    }

    pub async fn user_stats(&self, email: &str) -> UserStats {
        match &self.store {
            Some(store) => or_default("user stats", store.user_stats(email).await),
            None => UserStats::default(),
        }
    }

    pub async fn usage_stats(&self, email: &str) -> UsageStats {
        match &self.store {
            Some(store) => or_default("usage stats", store.usage_stats(email).await),
            None => UsageStats::default(),
        }
    }
}

fn or_default<T: Default>(what: &str, result: StoreResult<T>) -> T {
    result.unwrap_or_else(|e| {
        log::error!("Failed to read {}: {}", what, e);
        T::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explainer::{Level, MicroVariations};
    use chrono::Duration;

    fn record(confidence: f64, minutes_ago: i64) -> PredictionRecord {
        PredictionRecord {
            id: format!("r{}", minutes_ago),
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            prediction: VoiceLabel::Human,
            confidence,
            features: BTreeMap::new(),
            explanation: Explanation {
                pitch_variance: Level::High,
                spectral_smoothness: Level::Low,
                micro_variations: MicroVariations::Present,
            },
            user_email: None,
            filename: None,
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn test_trend() {
        assert_eq!(compute_trend(&[]), Trend::NoData);
        assert_eq!(compute_trend(&[0.9; 9]), Trend::Stable);

        let mut rising = vec![0.9; 5];
        rising.extend([0.7; 5]);
        assert_eq!(compute_trend(&rising), Trend::Improving);

        let mut falling = vec![0.6; 5];
        falling.extend([0.7; 5]);
        assert_eq!(compute_trend(&falling), Trend::Declining);

        let mut flat = vec![0.72; 5];
        flat.extend([0.7; 5]);
        assert_eq!(compute_trend(&flat), Trend::Stable);
    }

    #[test]
    fn test_trend_serialization() {
        assert_eq!(serde_json::to_string(&Trend::NoData).unwrap(), "\"No data\"");
        assert_eq!(serde_json::to_string(&Trend::Improving).unwrap(), "\"Improving\"");
    }

    #[test]
    fn test_user_stats_from_parts() {
        let empty = UserStats::from_parts(0, 0, 0, 0.0, &[]);
        assert_eq!(empty.trend, Trend::NoData);
        assert!(empty.last_prediction.is_none());

        let newest = vec![record(0.81234, 1), record(0.5, 2)];
        let stats = UserStats::from_parts(2, 0, 2, 0.65617, &newest);
        assert_eq!(stats.avg_confidence, 0.656);
        assert_eq!(stats.trend, Trend::Stable);
        let last = stats.last_prediction.unwrap();
        assert_eq!(last.confidence, 0.81234);
        assert_eq!(last.timestamp.len(), 19);
    }

    #[test]
    fn test_start_of_today() {
        let start = start_of_today();
        assert!(start <= Utc::now());
        assert_eq!(format_timestamp(&start).split(' ').nth(1), Some("00:00:00"));
    }

    #[tokio::test]
    async fn test_disabled_database_degrades() {
        let db = Database::disabled();
        assert!(!db.is_connected());
        assert_eq!(db.statistics().await, GlobalStats::default());
        assert_eq!(db.user_stats("a@b.io").await.trend, Trend::NoData);
        assert!(db.user_by_api_key("k").await.is_none());
        assert!(matches!(
            db.user_by_email("a@b.io").await,
            Err(StoreError::Unavailable)
        ));
    }
}
