use serde::Serialize;
use strum::{AsRefStr, EnumIter, EnumString};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DetectionError>;

/// Errors raised by the decode → extract → classify pipeline
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Invalid audio file format: {0}")]
    InvalidFormat(String),

    #[error("Audio is too short ({0:.1}s). Minimum is 1.0 seconds.")]
    AudioTooShort(f64),

    #[error("Audio is too long ({0:.1}s). Maximum is 5 minutes.")]
    AudioTooLong(f64),

    #[error("Processing error: {0}")]
    ProcessingError(String),

    #[error("Feature extraction error: {0}")]
    FeatureExtraction(String),

    #[error("Model loading error: {0}")]
    ModelLoadError(String),

    #[error("Prediction error: {0}")]
    Prediction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DetectionError {
    /// Machine-readable code reported to API callers
    pub fn code(&self) -> ErrorCode {
        match self {
            DetectionError::InvalidFormat(_) => ErrorCode::InvalidFormat,
            DetectionError::AudioTooShort(_) => ErrorCode::AudioTooShort,
            DetectionError::AudioTooLong(_) => ErrorCode::AudioTooLong,
            DetectionError::ProcessingError(_) | DetectionError::Io(_) => {
                ErrorCode::ProcessingError
            }
            DetectionError::FeatureExtraction(_) => ErrorCode::FeatureExtractionError,
            DetectionError::ModelLoadError(_) => ErrorCode::ModelNotInitialized,
            DetectionError::Prediction(_) => ErrorCode::PredictionError,
        }
    }

    /// Message shown to the caller. Validation errors describe the clip itself,
    /// everything else falls back to the registry text.
    pub fn public_message(&self) -> String {
        match self {
            DetectionError::AudioTooShort(_) | DetectionError::AudioTooLong(_) => self.to_string(),
            _ => self.code().message().to_string(),
        }
    }

    /// Underlying cause, only exposed for client-side (4xx) failures
    pub fn details(&self) -> Option<String> {
        match self {
            DetectionError::InvalidFormat(reason) | DetectionError::ProcessingError(reason) => {
                Some(reason.clone())
            }
            _ => None,
        }
    }
}

/// Fixed registry of error codes returned in `{error, message, details}` bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, AsRefStr, EnumString, EnumIter)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Audio validation
    InvalidFormat,
    AudioTooShort,
    AudioTooLong,
    ProcessingError,
    MissingAudio,
    InvalidRequest,

    // Account validation
    InvalidEmail,
    WeakPassword,
    UserExists,

    // Authentication
    Unauthorized,
    AuthenticationRequired,
    InvalidToken,
    InvalidApiKey,
    InvalidCredentials,

    UserNotFound,

    // Server side
    FeatureExtractionError,
    PredictionError,
    ModelNotInitialized,
    InternalError,
    DatabaseUnavailable,
}

impl ErrorCode {
    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::InvalidFormat => "Invalid audio file format",
            ErrorCode::AudioTooShort => "Audio must be at least 1 second long",
            ErrorCode::AudioTooLong => "Audio must be at most 5 minutes long",
            ErrorCode::ProcessingError => "Failed to process audio",
            ErrorCode::MissingAudio => "Request must include audio_base64",
            ErrorCode::InvalidRequest => "Malformed request body",
            ErrorCode::InvalidEmail => "Invalid email format",
            ErrorCode::WeakPassword => "Password must be at least 8 characters long",
            ErrorCode::UserExists => "User with this email already exists",
            ErrorCode::Unauthorized => "Invalid or missing authentication",
            ErrorCode::AuthenticationRequired => {
                "Provide a Bearer token or an api-key header"
            }
            ErrorCode::InvalidToken => "Invalid or expired token",
            ErrorCode::InvalidApiKey => "Invalid API key",
            ErrorCode::InvalidCredentials => "Invalid email or password",
            ErrorCode::UserNotFound => "User not found",
            ErrorCode::FeatureExtractionError => "Failed to extract audio features",
            ErrorCode::PredictionError => "Failed to make prediction",
            ErrorCode::ModelNotInitialized => {
                "Model not initialized. Please contact administrator."
            }
            ErrorCode::InternalError => "An unexpected error occurred",
            ErrorCode::DatabaseUnavailable => "Database is not available",
        }
    }

    /// HTTP status code for this error class
    pub fn status(self) -> u16 {
        match self {
            ErrorCode::InvalidFormat
            | ErrorCode::AudioTooShort
            | ErrorCode::AudioTooLong
            | ErrorCode::ProcessingError
            | ErrorCode::MissingAudio
            | ErrorCode::InvalidRequest
            | ErrorCode::InvalidEmail
            | ErrorCode::WeakPassword
            | ErrorCode::UserExists => 400,
            ErrorCode::Unauthorized
            | ErrorCode::AuthenticationRequired
            | ErrorCode::InvalidToken
            | ErrorCode::InvalidApiKey
            | ErrorCode::InvalidCredentials => 401,
            ErrorCode::UserNotFound => 404,
            ErrorCode::FeatureExtractionError
            | ErrorCode::PredictionError
            | ErrorCode::ModelNotInitialized
            | ErrorCode::InternalError => 500,
            ErrorCode::DatabaseUnavailable => 503,
        }
    }
}
