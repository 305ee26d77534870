//! Request extractors: JSON and query bodies with API-shaped rejections, and
//! the three authentication modes.

use super::error::ApiError;
use super::AppState;
use crate::auth::parse_bearer;
use crate::error::ErrorCode;
use crate::storage::User;
use axum::extract::{FromRequest, FromRequestParts, Query};
use axum::Json;
use http::header::AUTHORIZATION;
use http::request::Parts;
use std::fmt;

/// Legacy header carrying an API key on `/detect-voice`
pub const API_KEY_HEADER: &str = "api-key";

/// `Json<T>` whose rejections become `INVALID_REQUEST`
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// `Query<T>` whose rejections become `INVALID_REQUEST`
#[derive(Debug, FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

fn header<'a>(parts: &'a Parts, name: impl http::header::AsHeaderName) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

/// Who is calling `/detect-voice`
#[derive(Debug, Clone)]
pub enum Caller {
    /// Authenticated with the process-wide API key
    Anonymous,
    User(User),
}

impl Caller {
    pub fn email(&self) -> Option<&str> {
        match self {
            Caller::Anonymous => None,
            Caller::User(user) => Some(&user.email),
        }
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.email().unwrap_or("anonymous"))
    }
}

/// Resolve the subject of a verified access token.
///
/// A missing or failing store answers `DATABASE_UNAVAILABLE` rather than
/// `USER_NOT_FOUND`: the token may belong to a real account.
async fn token_subject(state: &AppState, email: &str) -> Result<User, ApiError> {
    state
        .db
        .user_by_email(email)
        .await?
        .ok_or_else(|| ApiError::new(ErrorCode::UserNotFound))
}

/// Process-wide secret or a registered user's key
async fn api_key_caller(state: &AppState, key: &str) -> Option<Caller> {
    if state.auth.is_master_key(key) {
        return Some(Caller::Anonymous);
    }
    state.db.user_by_api_key(key).await.map(Caller::User)
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        if let Some(token) = header(parts, AUTHORIZATION).and_then(parse_bearer) {
            if let Ok(claims) = state.auth.verify_token(token) {
                return token_subject(state, &claims.sub).await.map(Caller::User);
            }
            return api_key_caller(state, token)
                .await
                .ok_or_else(|| ApiError::new(ErrorCode::InvalidToken));
        }

        if let Some(key) = header(parts, API_KEY_HEADER) {
            return api_key_caller(state, key)
                .await
                .ok_or_else(|| ApiError::new(ErrorCode::InvalidApiKey));
        }

        Err(ApiError::new(ErrorCode::AuthenticationRequired))
    }
}

/// Registered user authenticated by access token
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let value =
            header(parts, AUTHORIZATION).ok_or_else(|| ApiError::new(ErrorCode::Unauthorized))?;
        let token = parse_bearer(value).ok_or_else(|| ApiError::new(ErrorCode::InvalidToken))?;
        let claims = state.auth.verify_token(token)?;
        token_subject(state, &claims.sub).await.map(AuthUser)
    }
}

/// Holder of the process-wide API key
#[derive(Debug, Clone, Copy)]
pub struct Operator;

impl FromRequestParts<AppState> for Operator {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let value =
            header(parts, AUTHORIZATION).ok_or_else(|| ApiError::new(ErrorCode::Unauthorized))?;
        match parse_bearer(value) {
            Some(key) if state.auth.is_master_key(key) => Ok(Operator),
            _ => Err(ApiError::new(ErrorCode::InvalidApiKey)),
        }
    }
}
