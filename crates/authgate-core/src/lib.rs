//! authgate core - configuration, shared errors and database bootstrap
//!
//! This crate holds the pieces every authgate binary needs before the first
//! request is served:
//! - Configuration management (env, TOML, validation)
//! - Common error types
//! - PostgreSQL pool bootstrap and schema
//! - Translation of unique-constraint violations into field errors
//! - The `Validate` shape check for request bodies

pub mod config;
pub mod db;
pub mod validate;

pub use config::{
    AppConfig, AuthConfig, ConfigError, DatabaseConfig, LoggingConfig, PasswordConfig,
    ServerConfig,
};
pub use db::{connect, migrate, unique_violation_fields};
pub use validate::{FieldErrors, Validate};

use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for authgate startup and persistence
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
