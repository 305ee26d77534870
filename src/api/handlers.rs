use super::error::ApiError;
use super::extract::{ApiJson, ApiQuery, AuthUser, Caller, Operator};
use super::schema::{
    Credentials, DashboardStats, DetectRequest, DetectResponse, FeatureImportance, HistoryEntry,
    LimitQuery, Listing, ModelInfo, Profile, TokenResponse, DEFAULT_HISTORY_LIMIT,
    DEFAULT_RECENT_LIMIT, MAX_HISTORY_LIMIT,
};
use super::AppState;
use crate::auth::{
    generate_api_key, hash_password, validate_email, validate_password, verify_password,
};
use crate::error::ErrorCode;
use crate::pipeline::DetectionOutcome;
use crate::storage::{GlobalStats, PredictionRecord, UsageStatus};
use axum::extract::State;
use axum::Json;
use http::StatusCode;
use serde_json::{json, Value};

const SERVICE_NAME: &str = "AI Voice Detection API";
const DETECT_ENDPOINT: &str = "detect-voice";

pub async fn root() -> Json<Value> {
    Json(json!({
        "status": "online",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn detect_voice(
    State(state): State<AppState>,
    caller: Caller,
    ApiJson(request): ApiJson<DetectRequest>,
) -> Result<Json<DetectResponse>, ApiError> {
    log::info!("🎙️ Received voice detection request from {}", caller);

    let result = run_detection(&state, request).await;

    if let Some(email) = caller.email() {
        let status = if result.is_ok() {
            UsageStatus::Success
        } else {
            UsageStatus::Error
        };
        let db = state.db.clone();
        let email = email.to_string();
        tokio::spawn(async move { db.log_api_usage(&email, DETECT_ENDPOINT, status).await });
    }

    let outcome = result?;
    log::info!(
        "✅ Prediction: {} (confidence: {:.2})",
        outcome.prediction.label,
        outcome.prediction.confidence
    );

    let record = outcome.to_record(caller.email(), None);
    let db = state.db.clone();
    tokio::spawn(async move {
        db.log_prediction(record).await;
    });

    Ok(Json(DetectResponse::from(&outcome)))
}

async fn run_detection(
    state: &AppState,
    request: DetectRequest,
) -> Result<DetectionOutcome, ApiError> {
    if request.audio_base64.trim().is_empty() {
        return Err(ErrorCode::MissingAudio.into());
    }
    let pipeline = state.pipeline.clone();
    let outcome = tokio::task::spawn_blocking(move || pipeline.detect(&request.audio_base64))
        .await
        .map_err(|e| {
            log::error!("Detection task failed: {}", e);
            ApiError::new(ErrorCode::InternalError)
        })??;
    Ok(outcome)
}

pub async fn register(
    State(state): State<AppState>,
    ApiJson(credentials): ApiJson<Credentials>,
) -> Result<(StatusCode, Json<TokenResponse>), ApiError> {
    validate_email(&credentials.email)?;
    validate_password(&credentials.password)?;

    if state.db.user_by_email(&credentials.email).await?.is_some() {
        return Err(ErrorCode::UserExists.into());
    }

    let password = credentials.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| {
            log::error!("Hashing task failed: {}", e);
            ApiError::new(ErrorCode::InternalError)
        })??;

    let user = state
        .db
        .create_user(&credentials.email, &password_hash, &generate_api_key())
        .await?;
    let token = state.auth.create_access_token(&user.email)?;
    log::info!("👤 Registered user {}", user.email);

    Ok((StatusCode::CREATED, Json(TokenResponse::bearer(token, &user))))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(credentials): ApiJson<Credentials>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Some(user) = state.db.user_by_email(&credentials.email).await? else {
        return Err(ErrorCode::InvalidCredentials.into());
    };

    let password = credentials.password;
    let hash = user.password_hash.clone();
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .unwrap_or(false);
    if !valid {
        return Err(ErrorCode::InvalidCredentials.into());
    }

    let token = state.auth.create_access_token(&user.email)?;
    Ok(Json(TokenResponse::bearer(token, &user)))
}

pub async fn me(AuthUser(user): AuthUser) -> Json<Profile> {
    Json(Profile::from(&user))
}

pub async fn dashboard_stats(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Json<DashboardStats> {
    let (stats, usage) = tokio::join!(
        state.db.user_stats(&user.email),
        state.db.usage_stats(&user.email)
    );
    Json(DashboardStats {
        stats,
        usage,
        api_key: user.api_key,
    })
}

pub async fn dashboard_history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiQuery(query): ApiQuery<LimitQuery>,
) -> Json<Listing<HistoryEntry>> {
    let limit = query.resolve(DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT);
    let history = state.db.user_history(&user.email, limit).await;
    Json(Listing::from(
        history.into_iter().map(HistoryEntry::from).collect::<Vec<_>>(),
    ))
}

pub async fn stats(State(state): State<AppState>, _: Operator) -> Json<GlobalStats> {
    Json(state.db.statistics().await)
}

pub async fn recent(
    State(state): State<AppState>,
    _: Operator,
    ApiQuery(query): ApiQuery<LimitQuery>,
) -> Json<Listing<PredictionRecord>> {
    let limit = query.resolve(DEFAULT_RECENT_LIMIT, MAX_HISTORY_LIMIT);
    Json(Listing::from(state.db.recent_predictions(limit).await))
}

pub async fn model_info(State(state): State<AppState>, _: Operator) -> Json<ModelInfo> {
    let classifier = state.pipeline.classifier();
    Json(ModelInfo {
        n_trees: classifier.n_trees(),
        feature_names: classifier.feature_names().to_vec(),
        feature_importances: classifier
            .feature_importance()
            .into_iter()
            .map(|(name, importance)| FeatureImportance { name, importance })
            .collect(),
    })
}
