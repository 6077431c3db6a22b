//! Authentication service layer
//!
//! Business logic for registration, login, token refresh and logout. Handlers
//! stay thin and only translate between HTTP and these calls.

use super::password::PasswordHasher;
use super::session::TokenSessionManager;
use super::strength::{PasswordInput, PasswordValidator};
use super::users::{NewUser, UserDirectory, UserRecord};
use crate::error::AppError;
use authgate_core::{FieldErrors, Validate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// User registration request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl Validate for RegisterRequest {
    /// Shape checks only; password strength is judged separately
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();
        let username_len = self.username.chars().count();
        if username_len == 0 || username_len > MAX_USERNAME_LEN {
            errors.add(
                "username",
                format!("username must be 1 to {MAX_USERNAME_LEN} characters"),
            );
        }
        if !is_plausible_email(&self.email) {
            errors.add("email", "email must be a valid address");
        }
        if self.password.is_empty() {
            errors.add("password", "password is required");
        }
        errors.into_result()
    }
}

/// User login request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl Validate for LoginRequest {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();
        errors.require("username", &self.username);
        errors.require("password", &self.password);
        errors.into_result()
    }
}

/// Token refresh request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

impl Validate for RefreshRequest {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();
        errors.require("refresh_token", &self.refresh_token);
        errors.into_result()
    }
}

/// Logout request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

impl Validate for LogoutRequest {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();
        errors.require("refresh_token", &self.refresh_token);
        errors.into_result()
    }
}

const MAX_USERNAME_LEN: usize = 150;

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && domain.contains('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

/// Authentication response with tokens
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

/// User information response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    pub email: String,
}

impl From<UserRecord> for UserInfo {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
        }
    }
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserDirectory>,
    hasher: PasswordHasher,
    validator: PasswordValidator,
    sessions: TokenSessionManager,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        hasher: PasswordHasher,
        validator: PasswordValidator,
        sessions: TokenSessionManager,
    ) -> Self {
        Self {
            users,
            hasher,
            validator,
            sessions,
        }
    }

    pub fn sessions(&self) -> &TokenSessionManager {
        &self.sessions
    }

    /// Register a new user
    ///
    /// # Returns
    ///
    /// * `Ok(UserInfo)` - Newly created user
    /// * `Err(AppError::Validation)` - Every password rule that failed
    /// * `Err(AppError::Conflict)` - Username or email already taken
    pub async fn register(&self, request: RegisterRequest) -> Result<UserInfo, AppError> {
        let input = PasswordInput::new(&request.password)
            .with_username(&request.username)
            .with_email(&request.email);
        self.validator.validate(&input)?;

        let password_hash = self.hasher.hash_blocking(request.password).await?;

        let user = self
            .users
            .create(NewUser {
                username: request.username,
                email: request.email,
                password_hash,
            })
            .await?;

        tracing::info!(user_id = user.id, "User registered");
        Ok(user.into())
    }

    /// Login with username and password
    ///
    /// Unknown users and wrong passwords produce the same error. A stored
    /// record with outdated parameters is upgraded after a successful match.
    pub async fn login(&self, request: LoginRequest) -> Result<(UserInfo, AuthResponse), AppError> {
        let Some(user) = self.users.find_by_username(&request.username).await? else {
            // Burn the same KDF cost as a real verification.
            let _ = self.hasher.hash_blocking(request.password).await;
            return Err(AppError::invalid_credentials());
        };

        let matches = self
            .hasher
            .verify_blocking(user.password_hash.clone(), request.password.clone())
            .await?;
        if !matches {
            return Err(AppError::invalid_credentials());
        }

        if let Ok(true) = self.hasher.needs_rehash(&user.password_hash) {
            self.upgrade_hash(user.id, request.password).await;
        }

        let response = self.issue(user.id).await?;
        Ok((user.into(), response))
    }

    /// Exchange a refresh token for a new pair; the presented token is consumed
    ///
    /// Returns the subject the pair was issued for alongside the response.
    pub async fn refresh(&self, request: RefreshRequest) -> Result<(i64, AuthResponse), AppError> {
        let pair = self.sessions.refresh_pair(&request.refresh_token).await?;
        Ok((pair.user_id, self.response(pair.access_token, pair.refresh_token)))
    }

    /// Revoke the given refresh token
    ///
    /// Unknown or already consumed tokens are accepted silently.
    pub async fn logout(&self, user_id: i64, request: LogoutRequest) -> Result<(), AppError> {
        self.sessions.revoke(&request.refresh_token).await?;
        tracing::info!(user_id, "Refresh token revoked");
        Ok(())
    }

    pub async fn get_user(&self, user_id: i64) -> Result<UserInfo, AppError> {
        self.users
            .find_by_id(user_id)
            .await?
            .map(UserInfo::from)
            .ok_or_else(|| AppError::NotFound("User".to_string()))
    }

    async fn issue(&self, user_id: i64) -> Result<AuthResponse, AppError> {
        let pair = self.sessions.issue_pair(user_id).await?;
        Ok(self.response(pair.access_token, pair.refresh_token))
    }

    fn response(&self, access_token: String, refresh_token: String) -> AuthResponse {
        AuthResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.sessions.access_validity().as_secs(),
        }
    }

    async fn upgrade_hash(&self, user_id: i64, password: String) {
        let upgraded = match self.hasher.hash_blocking(password).await {
            Ok(hash) => hash,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to rehash password");
                return;
            }
        };
        match self.users.update_password_hash(user_id, &upgraded).await {
            Ok(()) => tracing::info!(user_id, "Upgraded password hash parameters"),
            Err(e) => tracing::warn!(user_id, error = %e, "Failed to store upgraded password hash"),
        }
    }
}
