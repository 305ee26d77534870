//! MongoDB backend
//!
//! Collections: `users` (unique `email` and `api_key`), `predictions` and
//! `api_usage_logs`.

use super::{
    start_of_today, GlobalStats, NewPrediction, PredictionRecord, Store, StoreError, StoreResult,
    UsageStats, UsageStatus, User, UserStats, TREND_WINDOW,
};
use crate::explainer::Explanation;
use crate::models::VoiceLabel;
use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

const USERS: &str = "users";
const PREDICTIONS: &str = "predictions";
const USAGE_LOGS: &str = "api_usage_logs";

const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Serialize, Deserialize)]
struct UserDoc {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    email: String,
    password_hash: String,
    api_key: String,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    created_at: DateTime<Utc>,
    #[serde(default)]
    total_requests: i64,
}

impl From<UserDoc> for User {
    fn from(doc: UserDoc) -> Self {
        User {
            id: doc.id.map(|id| id.to_hex()).unwrap_or_default(),
            email: doc.email,
            password_hash: doc.password_hash,
            api_key: doc.api_key,
            created_at: doc.created_at,
            total_requests: doc.total_requests,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PredictionDoc {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    timestamp: DateTime<Utc>,
    prediction: VoiceLabel,
    confidence: f64,
    #[serde(default)]
    features: BTreeMap<String, f64>,
    explanation: Explanation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
}

impl From<PredictionDoc> for PredictionRecord {
    fn from(doc: PredictionDoc) -> Self {
        PredictionRecord {
            id: doc.id.map(|id| id.to_hex()).unwrap_or_default(),
            timestamp: doc.timestamp,
            prediction: doc.prediction,
            confidence: doc.confidence,
            features: doc.features,
            explanation: doc.explanation,
            user_email: doc.user_email,
            filename: doc.filename,
            metadata: doc.metadata,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct UsageDoc {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    user_email: String,
    endpoint: String,
    status: UsageStatus,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    timestamp: DateTime<Utc>,
}

fn backend_err(e: MongoError) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Server message of a duplicate-key write error
fn duplicate_key_message(e: &MongoError) -> Option<&str> {
    match e.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == DUPLICATE_KEY => {
            Some(&we.message)
        }
        _ => None,
    }
}

/// Only the `email` index means the account exists; an `api_key` clash is a
/// key generation failure
fn user_conflict(message: &str, email: &str) -> StoreError {
    if message.contains("index: email_1") {
        StoreError::Duplicate(format!("email {}", email))
    } else {
        StoreError::Backend(message.to_string())
    }
}

fn inserted_id(id: Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        other => other.to_string(),
    }
}

pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    /// Connect, then make sure the unique user indexes exist
    pub async fn connect(uri: &str, database: &str) -> StoreResult<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);
        options.connect_timeout = Some(CONNECT_TIMEOUT);
        options.app_name = Some(env!("CARGO_PKG_NAME").to_string());

        let client =
            Client::with_options(options).map_err(|e| StoreError::Connection(e.to_string()))?;
        let store = Self {
            db: client.database(database),
        };
        store.ping().await?;
        store.ensure_indexes().await?;
        log::info!("Connected to MongoDB database '{}'", database);
        Ok(store)
    }

    async fn ensure_indexes(&self) -> StoreResult<()> {
        let unique = || IndexOptions::builder().unique(true).build();
        let users = self.users();
        for field in ["email", "api_key"] {
            let mut keys = Document::new();
            keys.insert(field, 1);
            users
                .create_index(IndexModel::builder().keys(keys).options(unique()).build())
                .await
                .map_err(backend_err)?;
        }
        Ok(())
    }

    fn users(&self) -> Collection<UserDoc> {
        self.db.collection(USERS)
    }

    fn predictions(&self) -> Collection<PredictionDoc> {
        self.db.collection(PREDICTIONS)
    }

    fn usage_logs(&self) -> Collection<UsageDoc> {
        self.db.collection(USAGE_LOGS)
    }

    async fn find_predictions(
        &self,
        filter: Document,
        limit: usize,
    ) -> StoreResult<Vec<PredictionRecord>> {
        let docs: Vec<PredictionDoc> = self
            .predictions()
            .find(filter)
            .sort(doc! { "timestamp": -1 })
            .limit(limit as i64)
            .await
            .map_err(backend_err)?
            .try_collect()
            .await
            .map_err(backend_err)?;
        Ok(docs.into_iter().map(PredictionRecord::from).collect())
    }

    async fn average_confidence(&self, filter: Document) -> StoreResult<f64> {
        let pipeline = vec![
            doc! { "$match": filter },
            doc! { "$group": { "_id": Bson::Null, "avg_confidence": { "$avg": "$confidence" } } },
        ];
        let groups: Vec<Document> = self
            .predictions()
            .aggregate(pipeline)
            .await
            .map_err(backend_err)?
            .try_collect()
            .await
            .map_err(backend_err)?;
        Ok(groups
            .first()
            .and_then(|g| g.get_f64("avg_confidence").ok())
            .unwrap_or(0.0))
    }

    async fn count_predictions(&self, filter: Document) -> StoreResult<u64> {
        self.predictions()
            .count_documents(filter)
            .await
            .map_err(backend_err)
    }
}

/// Copy `extra` into `base`, used to narrow a filter by label
fn with(base: &Document, extra: Document) -> Document {
    let mut merged = base.clone();
    merged.extend(extra);
    merged
}

#[async_trait]
impl Store for MongoStore {
    fn backend(&self) -> &'static str {
        "mongo"
    }

    async fn ping(&self) -> StoreResult<()> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        api_key: &str,
    ) -> StoreResult<User> {
        let mut user = UserDoc {
            id: None,
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            api_key: api_key.to_string(),
            created_at: Utc::now(),
            total_requests: 0,
        };
        let result = self
            .users()
            .insert_one(&user)
            .await
            .map_err(|e| {
                if let Some(message) = duplicate_key_message(&e) {
                    return user_conflict(message, email);
                }
                backend_err(e)
            })?;
        user.id = result.inserted_id.as_object_id();
        log::info!("Created user: {}", email);
        Ok(user.into())
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let found = self
            .users()
            .find_one(doc! { "email": email })
            .await
            .map_err(backend_err)?;
        Ok(found.map(User::from))
    }

    async fn user_by_api_key(&self, api_key: &str) -> StoreResult<Option<User>> {
        let found = self
            .users()
            .find_one(doc! { "api_key": api_key })
            .await
            .map_err(backend_err)?;
        Ok(found.map(User::from))
    }

    async fn log_prediction(&self, prediction: &NewPrediction) -> StoreResult<String> {
        let doc = PredictionDoc {
            id: None,
            timestamp: Utc::now(),
            prediction: prediction.prediction,
            confidence: prediction.confidence,
            features: prediction.features.clone(),
            explanation: prediction.explanation,
            user_email: prediction.user_email.clone(),
            filename: prediction.filename.clone(),
            metadata: prediction.metadata.clone(),
        };
        let result = self.predictions().insert_one(&doc).await.map_err(backend_err)?;
        Ok(inserted_id(result.inserted_id))
    }

    async fn recent_predictions(&self, limit: usize) -> StoreResult<Vec<PredictionRecord>> {
        self.find_predictions(doc! {}, limit).await
    }

    async fn statistics(&self) -> StoreResult<GlobalStats> {
        let all = doc! {};
        let total = self.count_predictions(all.clone()).await?;
        let ai = self
            .count_predictions(doc! { "prediction": VoiceLabel::AiGenerated.as_ref() })
            .await?;
        let human = self
            .count_predictions(doc! { "prediction": VoiceLabel::Human.as_ref() })
            .await?;
        let avg = self.average_confidence(all).await?;
        Ok(GlobalStats::new(total, ai, human, avg))
    }

    async fn user_history(&self, email: &str, limit: usize) -> StoreResult<Vec<PredictionRecord>> {
        self.find_predictions(doc! { "user_email": email }, limit).await
    }

    async fn user_stats(&self, email: &str) -> StoreResult<UserStats> {
        let mine = doc! { "user_email": email };
        let total = self.count_predictions(mine.clone()).await?;
        if total == 0 {
            return Ok(UserStats::default());
        }
        let ai = self
            .count_predictions(with(
                &mine,
                doc! { "prediction": VoiceLabel::AiGenerated.as_ref() },
            ))
            .await?;
        let human = self
            .count_predictions(with(&mine, doc! { "prediction": VoiceLabel::Human.as_ref() }))
            .await?;
        let avg = self.average_confidence(mine.clone()).await?;
        let newest = self.find_predictions(mine, TREND_WINDOW).await?;
        Ok(UserStats::from_parts(total, ai, human, avg, &newest))
    }

    async fn log_api_usage(
        &self,
        email: &str,
        endpoint: &str,
        status: UsageStatus,
    ) -> StoreResult<String> {
        let entry = UsageDoc {
            id: None,
            user_email: email.to_string(),
            endpoint: endpoint.to_string(),
            status,
            timestamp: Utc::now(),
        };
        let result = self.usage_logs().insert_one(&entry).await.map_err(backend_err)?;
        self.users()
            .update_one(doc! { "email": email }, doc! { "$inc": { "total_requests": 1 } })
            .await
            .map_err(backend_err)?;
        Ok(inserted_id(result.inserted_id))
    }

    async fn usage_stats(&self, email: &str) -> StoreResult<UsageStats> {
        let logs = self.usage_logs();
        let total = logs
            .count_documents(doc! { "user_email": email })
            .await
            .map_err(backend_err)?;
        let today = bson::DateTime::from_chrono(start_of_today());
        let requests_today = logs
            .count_documents(doc! { "user_email": email, "timestamp": { "$gte": today } })
            .await
            .map_err(backend_err)?;
        Ok(UsageStats {
            requests_today,
            total_requests: total,
        })
    }
}
