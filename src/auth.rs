//! Credentials: password hashing, access tokens and API keys

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use once_cell::sync::Lazy;
use rand::RngCore;
use regex::Regex;
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::config::AppConfig;

/// Shortest accepted password, in characters
pub const MIN_PASSWORD_LEN: usize = 8;
/// Random bytes behind each generated API key
const API_KEY_BYTES: usize = 32;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
});

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid email format")]
    InvalidEmail,
    #[error("Password must be at least {MIN_PASSWORD_LEN} characters long")]
    WeakPassword,
    #[error("Password hashing failed: {0}")]
    Hashing(String),
    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

/// Access token payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User email
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies credentials for the HTTP layer
pub struct AuthService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    expire_minutes: i64,
    master_key: SecretBox<String>,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("expire_minutes", &self.expire_minutes)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    pub fn new(jwt_secret: &str, expire_minutes: i64, master_key: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            expire_minutes,
            master_key: SecretBox::new(Box::new(master_key.to_string())),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.jwt.secret.expose_secret(),
            config.jwt.expire_minutes,
            config.api_key(),
        )
    }

    /// Signed HS256 token for `email`
    pub fn create_access_token(&self, email: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: email.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(self.expire_minutes)).timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    /// Check signature and expiry, returning the claims
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        Ok(data.claims)
    }

    /// Constant-time comparison against the process-wide API key
    pub fn is_master_key(&self, candidate: &str) -> bool {
        constant_time_eq(candidate, self.master_key.expose_secret())
    }
}

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Argon2id hash in PHC string format with a fresh random salt
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

/// False for wrong passwords and for hashes that fail to parse
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            log::warn!("Stored password hash is malformed: {}", e);
            false
        }
    }
}

/// Fresh URL-safe API key
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; API_KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn validate_email(email: &str) -> Result<(), AuthError> {
    if EMAIL_RE.is_match(email) {
        Ok(())
    } else {
        Err(AuthError::InvalidEmail)
    }
}

pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() >= MIN_PASSWORD_LEN {
        Ok(())
    } else {
        Err(AuthError::WeakPassword)
    }
}

/// Token from an `Authorization: Bearer <token>` header value.
///
/// The value must be exactly two whitespace-separated parts and the scheme
/// is matched case-insensitively.
pub fn parse_bearer(header: &str) -> Option<&str> {
    let mut parts = header.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Some(token),
        _ => None,
    }
}
