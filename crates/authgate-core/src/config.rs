//! authgate configuration management
//!
//! Handles configuration from environment variables and TOML files,
//! with development-friendly defaults for everything except the signing secret.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Shortest signing secret accepted at startup (256 bits)
pub const MIN_SECRET_LEN: usize = 32;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database connection
    pub database: DatabaseConfig,

    /// Token issuance and verification
    pub auth: AuthConfig,

    /// Password hashing and strength rules
    pub password: PasswordConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env()?;
        Ok(self)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Server
        if let Ok(host) = std::env::var("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_env("API_PORT")? {
            self.server.port = port;
        }
        if let Ok(origins) = std::env::var("CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // PostgreSQL
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(size) = parse_env("DATABASE_POOL_SIZE")? {
            self.database.pool_size = size;
        }

        // Tokens
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(secs) = parse_env("JWT_ACCESS_EXPIRATION_SECS")? {
            self.auth.access_token_ttl_secs = secs;
        }
        if let Some(secs) = parse_env("JWT_REFRESH_EXPIRATION_SECS")? {
            self.auth.refresh_token_ttl_secs = secs;
        }
        if let Some(secs) = parse_env("REFRESH_PURGE_INTERVAL_SECS")? {
            self.auth.purge_interval_secs = secs;
        }
        if let Ok(name) = std::env::var("AUTH_HEADER_NAME") {
            self.auth.header_name = name;
        }
        if let Ok(scheme) = std::env::var("AUTH_SCHEME") {
            self.auth.auth_scheme = scheme;
        }

        // Password hashing
        if let Some(v) = parse_env("ARGON2_TIME_COST")? {
            self.password.time_cost = v;
        }
        if let Some(v) = parse_env("ARGON2_MEMORY_COST")? {
            self.password.memory_cost = v;
        }
        if let Some(v) = parse_env("ARGON2_PARALLELISM")? {
            self.password.parallelism = v;
        }
        if let Some(v) = parse_env("PASSWORD_MIN_LENGTH")? {
            self.password.min_length = v;
        }
        if let Ok(path) = std::env::var("COMMON_PASSWORDS_PATH") {
            self.password.common_passwords_path = Some(PathBuf::from(path));
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.logging.json_format = format.eq_ignore_ascii_case("json");
        }

        Ok(())
    }

    /// Check the values that would otherwise fail on the first request
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::MissingRequired("JWT_SECRET".to_string()));
        }
        if self.auth.jwt_secret.len() < MIN_SECRET_LEN {
            let len = self.auth.jwt_secret.len();
            return Err(ConfigError::InvalidValue {
                key: "JWT_SECRET".to_string(),
                value: format!("<{len} bytes, need at least {MIN_SECRET_LEN}>"),
            });
        }
        if self.auth.access_token_ttl_secs == 0 {
            return Err(invalid("JWT_ACCESS_EXPIRATION_SECS", 0));
        }
        if self.auth.refresh_token_ttl_secs == 0 {
            return Err(invalid("JWT_REFRESH_EXPIRATION_SECS", 0));
        }
        if self.auth.purge_interval_secs == 0 {
            return Err(invalid("REFRESH_PURGE_INTERVAL_SECS", 0));
        }
        if self.auth.auth_scheme.trim().is_empty() {
            return Err(invalid("AUTH_SCHEME", &self.auth.auth_scheme));
        }
        if self.password.time_cost == 0 {
            return Err(invalid("ARGON2_TIME_COST", 0));
        }
        if self.password.parallelism == 0 {
            return Err(invalid("ARGON2_PARALLELISM", 0));
        }
        if self.password.memory_cost < self.password.parallelism.saturating_mul(8) {
            return Err(invalid("ARGON2_MEMORY_COST", self.password.memory_cost));
        }
        if self.password.salt_length < 8 {
            return Err(invalid("password.salt_length", self.password.salt_length));
        }
        if self.password.key_length < 4 {
            return Err(invalid("password.key_length", self.password.key_length));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Allowed origins for CORS (empty disables the CORS layer)
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec![],
        }
    }
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; in-memory stores are used when unset
    pub url: Option<String>,

    /// PostgreSQL connection pool size
    pub pool_size: u32,

    /// Apply the bundled schema on startup
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: 10,
            run_migrations: true,
        }
    }
}

/// Token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC signing secret for access tokens
    pub jwt_secret: String,

    /// Access token validity in seconds
    pub access_token_ttl_secs: u64,

    /// Refresh token validity in seconds
    pub refresh_token_ttl_secs: u64,

    /// How often consumed and expired refresh tokens are deleted
    pub purge_interval_secs: u64,

    /// Header carrying the bearer credential
    pub header_name: String,

    /// Scheme expected as the first field of the header value
    pub auth_scheme: String,

    /// `token_type` claim the verification gate requires
    pub token_type: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            access_token_ttl_secs: 15 * 60,
            refresh_token_ttl_secs: 7 * 24 * 60 * 60,
            purge_interval_secs: 60 * 60,
            header_name: "Authorization".to_string(),
            auth_scheme: "Bearer".to_string(),
            token_type: "access".to_string(),
        }
    }
}

/// Password hashing and validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordConfig {
    /// Argon2 iterations
    pub time_cost: u32,

    /// Argon2 memory in KiB (default: 102400 = 100 MiB)
    pub memory_cost: u32,

    /// Argon2 lanes
    pub parallelism: u32,

    /// Derived key length in bytes
    pub key_length: u32,

    /// Salt length in bytes
    pub salt_length: usize,

    /// Minimum password length in characters
    pub min_length: usize,

    /// Replacement for the bundled common password list
    pub common_passwords_path: Option<PathBuf>,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            time_cost: 2,
            memory_cost: 102_400,
            parallelism: 8,
            key_length: 32,
            salt_length: 16,
            min_length: 8,
            common_passwords_path: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
