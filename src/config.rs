use secrecy::{ExposeSecret, SecretBox};
use std::env;
use std::path::PathBuf;
use strum::{AsRefStr, EnumString};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },
    #[error("Environment error: {0}")]
    EnvError(#[from] env::VarError),
}

/// Which document store backs users, predictions and usage logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DbBackend {
    Mongo,
    #[strum(serialize = "firebase", serialize = "firestore")]
    Firebase,
    Memory,
    None,
}

#[derive(Debug)]
pub struct JwtConfig {
    pub secret: SecretBox<String>,
    pub expire_minutes: i64,
}

#[derive(Debug)]
pub struct FirebaseConfig {
    /// Inline service-account JSON, takes precedence over the file
    pub credentials_json: Option<SecretBox<String>>,
    pub credentials_path: PathBuf,
    pub project_id: Option<String>,
    pub emulator_host: Option<String>,
}

#[derive(Debug)]
pub struct DatabaseConfig {
    pub backend: DbBackend,
    pub mongodb_uri: String,
    pub mongodb_database: String,
    pub firebase: FirebaseConfig,
}

/// Service configuration, read from the environment
#[derive(Debug)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub model_dir: PathBuf,
    pub api_key: SecretBox<String>,
    pub jwt: JwtConfig,
    pub database: DatabaseConfig,
}

const DEFAULT_EXPIRE_MINUTES: i64 = 60 * 24;
const MIN_JWT_SECRET_LEN: usize = 16;

impl AppConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = Self::required_secret(&lookup, "API_KEY")?;
        let jwt_secret = Self::required_secret(&lookup, "JWT_SECRET_KEY")?;
        if jwt_secret.expose_secret().len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::InvalidValue {
                var: "JWT_SECRET_KEY".to_string(),
                reason: format!("must be at least {} characters", MIN_JWT_SECRET_LEN),
            });
        }

        let expire_minutes =
            Self::parsed(&lookup, "ACCESS_TOKEN_EXPIRE_MINUTES", DEFAULT_EXPIRE_MINUTES)?;
        if expire_minutes <= 0 {
            return Err(ConfigError::InvalidValue {
                var: "ACCESS_TOKEN_EXPIRE_MINUTES".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let backend = match lookup("DB_BACKEND") {
            Some(raw) => raw
                .trim()
                .parse::<DbBackend>()
                .map_err(|_| ConfigError::InvalidValue {
                    var: "DB_BACKEND".to_string(),
                    reason: format!("unknown backend '{}'", raw),
                })?,
            None => DbBackend::Mongo,
        };

        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: Self::parsed(&lookup, "PORT", 8000u16)?,
            model_dir: lookup("MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("model")),
            api_key,
            jwt: JwtConfig {
                secret: jwt_secret,
                expire_minutes,
            },
            database: DatabaseConfig {
                backend,
                mongodb_uri: lookup("MONGODB_URI")
                    .unwrap_or_else(|| "mongodb://localhost:27017/".to_string()),
                mongodb_database: lookup("MONGODB_DATABASE")
                    .unwrap_or_else(|| "voice_detection".to_string()),
                firebase: FirebaseConfig {
                    credentials_json: lookup("FIREBASE_CREDENTIALS_JSON")
                        .filter(|s| !s.trim().is_empty())
                        .map(|s| SecretBox::new(Box::new(s))),
                    credentials_path: lookup("FIREBASE_CREDENTIALS_PATH")
                        .map(PathBuf::from)
                        .unwrap_or_else(|| PathBuf::from("firebase-credentials.json")),
                    project_id: lookup("FIREBASE_PROJECT_ID"),
                    emulator_host: lookup("FIRESTORE_EMULATOR_HOST"),
                },
            },
        })
    }

    fn required_secret<F>(lookup: &F, var: &str) -> Result<SecretBox<String>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = lookup(var).ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))?;
        if value.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                var: var.to_string(),
                reason: "cannot be empty".to_string(),
            });
        }
        Ok(SecretBox::new(Box::new(value)))
    }

    fn parsed<F, T>(lookup: &F, var: &str, default: T) -> Result<T, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match lookup(var) {
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidValue {
                    var: var.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(default),
        }
    }

    /// Process-wide API key (use only for comparisons)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<AppConfig, ConfigError> {
    match AppConfig::load() {
        Ok(config) => {
            log::info!(
                "Loaded configuration (backend: {}, model dir: {})",
                config.database.backend.as_ref(),
                config.model_dir.display()
            );
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=your_value_here", var);
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const BASE: [(&str, &str); 2] = [
        ("API_KEY", "operator-secret"),
        ("JWT_SECRET_KEY", "0123456789abcdef0123"),
    ];

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup_from(&BASE)).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.model_dir, PathBuf::from("model"));
        assert_eq!(config.jwt.expire_minutes, 1440);
        assert_eq!(config.database.backend, DbBackend::Mongo);
        assert_eq!(config.database.mongodb_database, "voice_detection");
        assert_eq!(config.api_key(), "operator-secret");
        assert_eq!(config.bind_address(), "0.0.0.0:8000");
    }

    #[test]
    fn test_missing_secrets() {
        let err = AppConfig::from_lookup(lookup_from(&[("API_KEY", "x")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref v) if v == "JWT_SECRET_KEY"));

        let err = AppConfig::from_lookup(lookup_from(&[
            ("API_KEY", "x"),
            ("JWT_SECRET_KEY", "short"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_backend_and_port_parsing() {
        let mut pairs = BASE.to_vec();
        pairs.push(("DB_BACKEND", "Firestore"));
        pairs.push(("PORT", "9100"));
        let config = AppConfig::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.database.backend, DbBackend::Firebase);
        assert_eq!(config.port, 9100);

        let mut pairs = BASE.to_vec();
        pairs.push(("DB_BACKEND", "postgres"));
        assert!(AppConfig::from_lookup(lookup_from(&pairs)).is_err());

        let mut pairs = BASE.to_vec();
        pairs.push(("PORT", "not-a-port"));
        assert!(AppConfig::from_lookup(lookup_from(&pairs)).is_err());
    }

    #[test]
    #[serial]
    fn test_load_reads_process_environment() {
        env::set_var("API_KEY", "env-secret");
        env::set_var("JWT_SECRET_KEY", "env-jwt-secret-0123456789");
        env::set_var("DB_BACKEND", "memory");

        let config = AppConfig::load().unwrap();
        assert_eq!(config.api_key(), "env-secret");
        assert_eq!(config.database.backend, DbBackend::Memory);

        env::remove_var("API_KEY");
        env::remove_var("JWT_SECRET_KEY");
        env::remove_var("DB_BACKEND");
    }
}
