//! HTTP surface
//!
//! | route | auth |
//! |---|---|
//! | `GET /` | none |
//! | `POST /detect-voice` | bearer token (JWT or API key) or `api-key` header |
//! | `POST /auth/register`, `POST /auth/login` | none |
//! | `GET /auth/me`, `GET /dashboard/stats`, `GET /dashboard/history` | JWT |
//! | `GET /stats`, `GET /stats/recent`, `GET /model/info` | process-wide API key |

pub mod error;
pub mod extract;
pub mod handlers;
pub mod schema;

pub use error::ApiError;

use crate::auth::AuthService;
use crate::models::VoiceClassifier;
use crate::pipeline::DetectionPipeline;
use crate::storage::Database;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

/// Largest accepted request body; a five minute MP3 is well under this once
/// base64 encoded
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Shared, read-only handler state
#[derive(Debug, Clone)]
pub struct AppState {
    pub pipeline: DetectionPipeline,
    pub auth: Arc<AuthService>,
    pub db: Database,
}

impl AppState {
    pub fn new(classifier: Arc<VoiceClassifier>, auth: AuthService, db: Database) -> Self {
        Self {
            pipeline: DetectionPipeline::new(classifier),
            auth: Arc::new(auth),
            db,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/detect-voice", post(handlers::detect_voice))
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route("/auth/me", get(handlers::me))
        .route("/dashboard/stats", get(handlers::dashboard_stats))
        .route("/dashboard/history", get(handlers::dashboard_history))
        .route("/stats", get(handlers::stats))
        .route("/stats/recent", get(handlers::recent))
        .route("/model/info", get(handlers::model_info))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
