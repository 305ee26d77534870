use crate::auth::AuthError;
use crate::error::{DetectionError, ErrorCode};
use crate::storage::StoreError;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use serde::Serialize;

/// Error returned by every handler, rendered as `{error, message, details?}`
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorCode,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a str>,
}

impl ApiError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.message().to_string(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Server-side failure: the cause goes to the log, the caller gets the
    /// generic registry message
    fn internal(code: ErrorCode, cause: impl std::fmt::Display) -> Self {
        log::error!("{}: {}", code.as_ref(), cause);
        Self::new(code)
    }
}

impl From<ErrorCode> for ApiError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code,
            message: &self.message,
            details: self.details.as_deref(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<DetectionError> for ApiError {
    fn from(err: DetectionError) -> Self {
        let code = err.code();
        if code.status() >= 500 {
            return Self::internal(code, &err);
        }
        log::warn!("Voice detection error: {}", err);
        Self {
            code,
            message: err.public_message(),
            details: err.details(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidEmail => Self::new(ErrorCode::InvalidEmail),
            AuthError::WeakPassword => Self::new(ErrorCode::WeakPassword),
            AuthError::Token(_) => Self::new(ErrorCode::InvalidToken),
            AuthError::Hashing(_) => Self::internal(ErrorCode::InternalError, &err),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(_) => Self::new(ErrorCode::UserExists),
            StoreError::Unavailable | StoreError::Connection(_) => {
                log::warn!("Database unavailable: {}", err);
                Self::new(ErrorCode::DatabaseUnavailable)
            }
            StoreError::Backend(_) | StoreError::Malformed(_) | StoreError::Config(_) => {
                Self::internal(ErrorCode::InternalError, &err)
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(ErrorCode::InvalidRequest).with_details(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(ErrorCode::InvalidRequest).with_details(rejection.body_text())
    }
}
