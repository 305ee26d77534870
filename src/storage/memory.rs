//! Process-local store for development and tests

use super::{
    start_of_today, GlobalStats, NewPrediction, PredictionRecord, Store, StoreError, StoreResult,
    UsageLogEntry, UsageStats, UsageStatus, User, UserStats, TREND_WINDOW,
};
use crate::models::VoiceLabel;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    users: Vec<User>,
    /// Append order is timestamp order
    predictions: Vec<PredictionRecord>,
    usage: Vec<UsageLogEntry>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn mean_confidence<'a>(records: impl Iterator<Item = &'a PredictionRecord>) -> f64 {
    let (sum, n) = records.fold((0.0, 0usize), |(sum, n), r| (sum + r.confidence, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        api_key: &str,
    ) -> StoreResult<User> {
        let mut state = self.state.write().await;
        if state.users.iter().any(|u| u.email == email) {
            return Err(StoreError::Duplicate(format!("email {}", email)));
        }
        if state.users.iter().any(|u| u.api_key == api_key) {
            return Err(StoreError::Backend("api_key collision".to_string()));
        }
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            api_key: api_key.to_string(),
            created_at: Utc::now(),
            total_requests: 0,
        };
        state.users.push(user.clone());
        Ok(user)
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.iter().find(|u| u.email == email).cloned())
    }

    async fn user_by_api_key(&self, api_key: &str) -> StoreResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.iter().find(|u| u.api_key == api_key).cloned())
    }

    async fn log_prediction(&self, prediction: &NewPrediction) -> StoreResult<String> {
        let id = Uuid::new_v4().to_string();
        let record = PredictionRecord::from_new(id.clone(), Utc::now(), prediction);
        self.state.write().await.predictions.push(record);
        Ok(id)
    }

    async fn recent_predictions(&self, limit: usize) -> StoreResult<Vec<PredictionRecord>> {
        let state = self.state.read().await;
        Ok(state.predictions.iter().rev().take(limit).cloned().collect())
    }

    async fn statistics(&self) -> StoreResult<GlobalStats> {
        let state = self.state.read().await;
        let all = &state.predictions;
        let ai = all
            .iter()
            .filter(|r| r.prediction == VoiceLabel::AiGenerated)
            .count();
        let human = all.iter().filter(|r| r.prediction == VoiceLabel::Human).count();
        Ok(GlobalStats::new(
            all.len() as u64,
            ai as u64,
            human as u64,
            mean_confidence(all.iter()),
        ))
    }

    async fn user_history(&self, email: &str, limit: usize) -> StoreResult<Vec<PredictionRecord>> {
        let state = self.state.read().await;
        Ok(state
            .predictions
            .iter()
            .rev()
            .filter(|r| r.user_email.as_deref() == Some(email))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn user_stats(&self, email: &str) -> StoreResult<UserStats> {
        let state = self.state.read().await;
        let mine: Vec<&PredictionRecord> = state
            .predictions
            .iter()
            .rev()
            .filter(|r| r.user_email.as_deref() == Some(email))
            .collect();
        let count = |label: VoiceLabel| mine.iter().filter(|r| r.prediction == label).count() as u64;
        let newest: Vec<PredictionRecord> =
            mine.iter().take(TREND_WINDOW).map(|r| (*r).clone()).collect();

        Ok(UserStats::from_parts(
            mine.len() as u64,
            count(VoiceLabel::AiGenerated),
            count(VoiceLabel::Human),
            mean_confidence(mine.iter().copied()),
            &newest,
        ))
    }

    async fn log_api_usage(
        &self,
        email: &str,
        endpoint: &str,
        status: UsageStatus,
    ) -> StoreResult<String> {
        let mut state = self.state.write().await;
        let id = Uuid::new_v4().to_string();
        state.usage.push(UsageLogEntry {
            id: id.clone(),
            user_email: email.to_string(),
            endpoint: endpoint.to_string(),
            status,
            timestamp: Utc::now(),
        });
        if let Some(user) = state.users.iter_mut().find(|u| u.email == email) {
            user.total_requests += 1;
        }
        Ok(id)
    }

    async fn usage_stats(&self, email: &str) -> StoreResult<UsageStats> {
        let state = self.state.read().await;
        let today = start_of_today();
        let mine = state.usage.iter().filter(|e| e.user_email == email);
        Ok(UsageStats {
            total_requests: mine.clone().count() as u64,
            requests_today: mine.filter(|e| e.timestamp >= today).count() as u64,
        })
    }
}
