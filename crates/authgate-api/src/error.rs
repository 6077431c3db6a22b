//! API error handling
//!
//! Author: hephaex@gmail.com

use crate::auth::{DirectoryError, PasswordError, PasswordViolation, SessionError};
use authgate_core::{CoreError, FieldErrors};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Per-field or per-rule details for input errors
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn unauthorized() -> Self {
        Self::new("UNAUTHORIZED", "Authentication required")
    }

    pub fn internal_error() -> Self {
        Self::new("INTERNAL_ERROR", "Internal server error")
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Validation { message: String, details: Value },
    Conflict(FieldErrors),
    Unauthorized(String),
    Internal(String),
    Database(String),
}

impl AppError {
    pub fn invalid_credentials() -> Self {
        AppError::Unauthorized("Invalid username or password".to_string())
    }

    /// Short reason for the audit log. Server-side details are not included.
    pub fn audit_reason(&self) -> String {
        match self {
            AppError::NotFound(resource) => format!("{resource} not found"),
            AppError::BadRequest(msg)
            | AppError::Validation { message: msg, .. }
            | AppError::Unauthorized(msg) => msg.clone(),
            AppError::Conflict(fields) => fields.to_string(),
            AppError::Internal(_) | AppError::Database(_) => "server error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                ApiError::new("NOT_FOUND", format!("{resource} not found")),
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ApiError::bad_request(msg)),
            AppError::Validation { message, details } => (
                StatusCode::BAD_REQUEST,
                ApiError::new("VALIDATION_ERROR", message).with_details(details),
            ),
            AppError::Conflict(fields) => (
                StatusCode::CONFLICT,
                ApiError::new("CONFLICT", fields.to_string()).with_details(json!(fields.0)),
            ),
            AppError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, ApiError::new("UNAUTHORIZED", msg))
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, ApiError::internal_error())
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::new("DATABASE_ERROR", "Database operation failed"),
                )
            }
        };

        (status, Json(error)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::DatabaseError(msg) => AppError::Database(msg),
            CoreError::ConfigError(e) => AppError::Internal(format!("Configuration error: {e}")),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidToken => {
                AppError::Unauthorized("Invalid refresh token".to_string())
            }
            SessionError::Expired => {
                AppError::Unauthorized("Refresh token has expired".to_string())
            }
            SessionError::Store(msg) => AppError::Database(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<DirectoryError> for AppError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Duplicate(fields) => AppError::Conflict(fields),
            DirectoryError::Unavailable(msg) => AppError::Database(msg),
        }
    }
}

impl From<Vec<PasswordViolation>> for AppError {
    fn from(violations: Vec<PasswordViolation>) -> Self {
        let reasons: Vec<String> = violations.iter().map(ToString::to_string).collect();
        AppError::Validation {
            message: reasons.join("; "),
            details: json!({ "password": reasons }),
        }
    }
}

impl From<FieldErrors> for AppError {
    fn from(fields: FieldErrors) -> Self {
        AppError::Validation {
            message: fields.to_string(),
            details: json!(fields.0),
        }
    }
}
