//! Behaviour every [`Store`] backend must share. Live backends run it from
//! their ignored tests; [`MemoryStore`](super::MemoryStore) runs it always.

use super::{NewPrediction, Store, StoreError, Trend, UsageStatus};
use crate::explainer::{Explanation, Level, MicroVariations};
use crate::models::VoiceLabel;
use std::collections::BTreeMap;
use std::time::Duration;

fn prediction(email: &str, confidence: f64) -> NewPrediction {
    NewPrediction {
        prediction: VoiceLabel::AiGenerated,
        confidence,
        features: BTreeMap::from([("pitch_variance".to_string(), 120.0)]),
        explanation: Explanation {
            pitch_variance: Level::Low,
            spectral_smoothness: Level::High,
            micro_variations: MicroVariations::Minimal,
        },
        user_email: Some(email.to_string()),
        filename: None,
        metadata: serde_json::json!({ "audio_duration": 2.0 }),
    }
}

/// Uses fresh identities, so it is safe against a database holding other data
pub async fn exercise(store: &dyn Store) {
    let tag = uuid::Uuid::new_v4().simple().to_string();
    let email = format!("contract-{}@example.com", &tag[..12]);
    let api_key = format!("key-{}", tag);

    let user = store.create_user(&email, "hash", &api_key).await.unwrap();
    assert_eq!(user.email, email);
    assert_eq!(user.total_requests, 0);
    assert!(matches!(
        store
            .create_user(&email, "hash", &format!("other-{}", tag))
            .await,
        Err(StoreError::Duplicate(_))
    ));
    let by_key = store.user_by_api_key(&api_key).await.unwrap().unwrap();
    assert_eq!(by_key.email, email);

    let before = store.statistics().await.unwrap().total_predictions;
    for i in 0..10 {
        let confidence = if i < 5 { 0.6 } else { 0.9 };
        store
            .log_prediction(&prediction(&email, confidence))
            .await
            .unwrap();
        // distinct timestamps keep newest-first ordering unambiguous
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let history = store.user_history(&email, 3).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].confidence, 0.9);
    assert!(history[0].timestamp >= history[1].timestamp);

    let stats = store.user_stats(&email).await.unwrap();
    assert_eq!(stats.total_tests, 10);
    assert_eq!(stats.ai_count, 10);
    assert_eq!(stats.human_count, 0);
    assert!((stats.avg_confidence - 0.75).abs() < 1e-9);
    assert!(stats.last_prediction.is_some());
    assert_eq!(stats.trend, Trend::Improving);

    let global = store.statistics().await.unwrap();
    assert!(global.total_predictions >= before + 10);

    store
        .log_api_usage(&email, "detect-voice", UsageStatus::Success)
        .await
        .unwrap();
    store
        .log_api_usage(&email, "detect-voice", UsageStatus::Error)
        .await
        .unwrap();
    let user = store.user_by_email(&email).await.unwrap().unwrap();
    assert_eq!(user.total_requests, 2);
    let usage = store.usage_stats(&email).await.unwrap();
    assert_eq!(usage.total_requests, 2);
    assert_eq!(usage.requests_today, 2);
}
