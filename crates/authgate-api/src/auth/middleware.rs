//! Authentication middleware for protecting routes
//!
//! Extracts a bearer credential from the configured header, verifies it, and
//! checks its `token_type`. On success the subject is added to the request
//! extensions as [`AuthenticatedUser`]; otherwise the request is answered
//! with 401 and never reaches the handler.

use super::jwt::{AccessTokenCodec, Claims, JwtError, ACCESS_TOKEN_TYPE};
use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::error::ApiError;
use async_trait::async_trait;
use authgate_core::AuthConfig;
use axum::{
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{header::InvalidHeaderName, request::Parts, HeaderMap, HeaderName, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Authenticated subject extracted from a verified token
///
/// This is added to request extensions by [`auth_middleware`] and can be
/// taken directly as a handler argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    /// User's unique identifier
    pub user_id: i64,
    /// JWT token ID
    pub jti: String,
}

impl From<Claims> for AuthenticatedUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.user_id,
            jti: claims.jti,
        }
    }
}

/// Authentication middleware errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authorization header is missing or invalid")]
    MissingOrMalformedHeader,

    #[error("Token has expired")]
    Expired,

    #[error("Invalid token: {0}")]
    InvalidToken(JwtError),

    #[error("Request was not authenticated")]
    Unauthenticated,
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => AuthError::Expired,
            other => AuthError::InvalidToken(other),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        // Token failures other than expiry share one message.
        let error = match self {
            AuthError::MissingOrMalformedHeader => ApiError::new(
                "UNAUTHORIZED",
                "Authorization header is missing or invalid",
            ),
            AuthError::Expired => ApiError::new("TOKEN_EXPIRED", "Your token is expired"),
            AuthError::InvalidToken(_) => ApiError::new(
                "UNAUTHORIZED",
                "Unable to extract claims or token type is wrong",
            ),
            AuthError::Unauthenticated => ApiError::unauthorized(),
        };

        (StatusCode::UNAUTHORIZED, Json(error)).into_response()
    }
}

/// Where the gate looks for the credential and what it accepts
#[derive(Debug, Clone)]
pub struct AuthGateConfig {
    /// Header carrying the credential
    pub header_name: HeaderName,
    /// Required first field of the header value
    pub auth_scheme: String,
    /// Required `token_type` claim
    pub token_type: String,
}

impl Default for AuthGateConfig {
    fn default() -> Self {
        Self {
            header_name: axum::http::header::AUTHORIZATION,
            auth_scheme: "Bearer".to_string(),
            token_type: ACCESS_TOKEN_TYPE.to_string(),
        }
    }
}

impl AuthGateConfig {
    pub fn new(
        header_name: &str,
        auth_scheme: impl Into<String>,
        token_type: impl Into<String>,
    ) -> Result<Self, InvalidHeaderName> {
        Ok(Self {
            header_name: HeaderName::try_from(header_name)?,
            auth_scheme: auth_scheme.into(),
            token_type: token_type.into(),
        })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, InvalidHeaderName> {
        Self::new(&config.header_name, &config.auth_scheme, &config.token_type)
    }
}

/// Request-boundary token verifier
#[derive(Debug, Clone)]
pub struct AuthGate {
    codec: AccessTokenCodec,
    config: AuthGateConfig,
}

impl AuthGate {
    pub fn new(codec: AccessTokenCodec, config: AuthGateConfig) -> Self {
        Self { codec, config }
    }

    pub fn config(&self) -> &AuthGateConfig {
        &self.config
    }

    /// Resolve the request headers to an authenticated subject
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AuthenticatedUser, AuthError> {
        let value = headers
            .get(&self.config.header_name)
            .ok_or(AuthError::MissingOrMalformedHeader)?
            .to_str()
            .map_err(|_| AuthError::MissingOrMalformedHeader)?;

        let token = extract_bearer_token(value, &self.config.auth_scheme)?;
        let claims = self.codec.verify(token, &self.config.token_type)?;
        Ok(AuthenticatedUser::from(claims))
    }
}

/// Split `<scheme> <token>` and return the token
///
/// The value must have exactly two whitespace-separated fields and the first
/// must equal `scheme`.
pub fn extract_bearer_token<'a>(value: &'a str, scheme: &str) -> Result<&'a str, AuthError> {
    let mut fields = value.split_whitespace();
    match (fields.next(), fields.next(), fields.next()) {
        (Some(found), Some(token), None) if found == scheme => Ok(token),
        _ => Err(AuthError::MissingOrMalformedHeader),
    }
}

/// Authentication middleware that requires a valid token
///
/// # Usage
///
/// ```ignore
/// use axum::{Router, routing::get, middleware};
/// use authgate_api::auth::middleware::auth_middleware;
///
/// let app = Router::new()
///     .route("/protected", get(protected_handler))
///     .route_layer(middleware::from_fn_with_state(gate, auth_middleware));
/// ```
///
/// In handlers, extract the user:
///
/// ```
/// use authgate_api::auth::middleware::AuthenticatedUser;
///
/// async fn protected_handler(user: AuthenticatedUser) -> String {
///     format!("Hello, user {}!", user.user_id)
/// }
/// ```
pub async fn auth_middleware(
    State(gate): State<Arc<AuthGate>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let user = match gate.authenticate(request.headers()) {
        Ok(user) => user,
        Err(e) => {
            audit_log(&AuditEvent::InvalidToken {
                ip_address: extract_ip_address(request.headers()),
                user_agent: extract_user_agent(request.headers()),
                reason: e.to_string(),
            });
            return Err(e);
        }
    };

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or(AuthError::Unauthenticated)
    }
}
