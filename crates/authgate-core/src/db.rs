//! PostgreSQL bootstrap
//!
//! Pool creation, the bundled schema, and mapping of unique-constraint
//! violations onto the request fields that caused them.

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::validate::FieldErrors;
use crate::{CoreError, Result};

const SCHEMA: &str = include_str!("../migrations/0001_init.sql");

/// SQLSTATE for unique_violation
const UNIQUE_VIOLATION: &str = "23505";

/// Open a connection pool and check it with a round trip
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let url = config
        .url
        .as_deref()
        .ok_or_else(|| CoreError::DatabaseError("DATABASE_URL is not set".to_string()))?;

    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .connect(url)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to open PostgreSQL pool");
            CoreError::DatabaseError(format!("PostgreSQL connection failed: {e}"))
        })?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to ping PostgreSQL");
            CoreError::DatabaseError(format!("PostgreSQL ping failed: {e}"))
        })?;

    Ok(pool)
}

/// Apply the bundled schema. Every statement is idempotent.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| CoreError::DatabaseError(format!("Migration failed: {e}")))?;

    tracing::info!("Database schema is up to date");
    Ok(())
}

/// Translate a unique violation into field errors.
///
/// Constraints must be named `unq-<table>-<field>`; anything else, and any
/// error that is not a unique violation, yields `None`.
pub fn unique_violation_fields(err: &sqlx::Error) -> Option<FieldErrors> {
    let db_err = err.as_database_error()?;
    if db_err.code().as_deref() != Some(UNIQUE_VIOLATION) {
        return None;
    }

    let constraint = db_err.constraint()?;
    let fields = fields_from_constraint(constraint);
    if fields.is_none() {
        tracing::warn!(constraint, "Unexpected constraint name format");
    }
    fields
}

fn fields_from_constraint(constraint: &str) -> Option<FieldErrors> {
    let parts: Vec<&str> = constraint.split('-').collect();
    match parts.as_slice() {
        ["unq", _table, field] if !field.is_empty() => {
            let mut errors = FieldErrors::default();
            errors.add(*field, format!("{field} is already in use"));
            Some(errors)
        }
        _ => None,
    }
}
