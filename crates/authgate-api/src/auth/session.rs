//! Token pair issuance and rotation
//!
//! Combines the stateless access token codec with the refresh token store.
//! Either both halves of a pair are produced or the caller gets an error.

use super::jwt::{AccessTokenCodec, JwtError};
use super::store::{RefreshTokenStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

/// Access and refresh token issued together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TokenPair {
    /// Subject both tokens belong to
    pub user_id: i64,
    pub access_token: String,
    pub refresh_token: String,
}

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid refresh token")]
    InvalidToken,

    #[error("Refresh token has expired")]
    Expired,

    #[error("Token validity is out of range")]
    InvalidValidity,

    #[error("Failed to sign access token: {0}")]
    Signing(JwtError),

    #[error("Refresh token store failure: {0}")]
    Store(String),
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound | StoreError::AlreadyConsumed => SessionError::InvalidToken,
            StoreError::Expired => SessionError::Expired,
            StoreError::InvalidValidity => SessionError::InvalidValidity,
            StoreError::Unavailable(msg) => SessionError::Store(msg),
        }
    }
}

impl From<JwtError> for SessionError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::InvalidValidity => SessionError::InvalidValidity,
            other => SessionError::Signing(other),
        }
    }
}

/// Issues and rotates token pairs
#[derive(Clone)]
pub struct TokenSessionManager {
    codec: AccessTokenCodec,
    store: Arc<dyn RefreshTokenStore>,
    access_validity: Duration,
    refresh_validity: Duration,
}

impl TokenSessionManager {
    pub fn new(
        codec: AccessTokenCodec,
        store: Arc<dyn RefreshTokenStore>,
        access_validity: Duration,
        refresh_validity: Duration,
    ) -> Self {
        Self {
            codec,
            store,
            access_validity,
            refresh_validity,
        }
    }

    pub fn codec(&self) -> &AccessTokenCodec {
        &self.codec
    }

    pub fn access_validity(&self) -> Duration {
        self.access_validity
    }

    /// Issue a fresh pair with the configured validities
    pub async fn issue_pair(&self, user_id: i64) -> Result<TokenPair, SessionError> {
        self.issue_pair_with(user_id, self.access_validity, self.refresh_validity)
            .await
    }

    /// Issue a fresh pair
    ///
    /// The access token is signed first so that a signing failure never leaves
    /// a refresh record behind.
    pub async fn issue_pair_with(
        &self,
        user_id: i64,
        access_validity: Duration,
        refresh_validity: Duration,
    ) -> Result<TokenPair, SessionError> {
        let access_token = self.codec.issue(user_id, access_validity)?;
        let refresh_token = self.store.create(user_id, refresh_validity).await?;

        tracing::debug!(user_id, "Issued token pair");
        Ok(TokenPair {
            user_id,
            access_token,
            refresh_token,
        })
    }

    /// Rotate `old_refresh_token` with the configured validities
    pub async fn refresh_pair(&self, old_refresh_token: &str) -> Result<TokenPair, SessionError> {
        self.refresh_pair_with(old_refresh_token, self.access_validity, self.refresh_validity)
            .await
    }

    /// Consume `old_refresh_token` and issue a new pair for the same subject
    ///
    /// # Returns
    ///
    /// * `Err(SessionError::InvalidToken)` - Unknown or already used token
    /// * `Err(SessionError::Expired)` - Token past its expiry
    /// * `Err(SessionError::Store)` - Store unavailable; nothing was rotated
    pub async fn refresh_pair_with(
        &self,
        old_refresh_token: &str,
        access_validity: Duration,
        refresh_validity: Duration,
    ) -> Result<TokenPair, SessionError> {
        // Rejected up front so a bad validity cannot burn the presented token.
        if access_validity.as_secs() < 1 {
            return Err(SessionError::InvalidValidity);
        }

        let rotated = self
            .store
            .consume_and_replace(old_refresh_token, refresh_validity)
            .await
            .map_err(|e| {
                if matches!(e, StoreError::AlreadyConsumed) {
                    tracing::warn!("Refresh token presented after it was consumed");
                }
                SessionError::from(e)
            })?;

        let access_token = self
            .codec
            .issue(rotated.user_id, access_validity)
            .map_err(|e| {
                tracing::error!(
                    user_id = rotated.user_id,
                    error = %e,
                    "Rotated refresh token but failed to sign access token"
                );
                SessionError::from(e)
            })?;

        tracing::debug!(user_id = rotated.user_id, "Rotated token pair");
        Ok(TokenPair {
            user_id: rotated.user_id,
            access_token,
            refresh_token: rotated.token,
        })
    }

    /// Invalidate a refresh token (logout)
    pub async fn revoke(&self, refresh_token: &str) -> Result<(), SessionError> {
        self.store.revoke(refresh_token).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::ACCESS_TOKEN_TYPE;
    use crate::auth::store::{InMemoryRefreshTokenStore, RotatedToken};
    use async_trait::async_trait;

    const ACCESS: Duration = Duration::from_secs(900);
    const REFRESH: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    fn manager_with(store: Arc<dyn RefreshTokenStore>) -> TokenSessionManager {
        TokenSessionManager::new(
            AccessTokenCodec::new(b"session-test-secret-0123456789abcdef"),
            store,
            ACCESS,
            REFRESH,
        )
    }

    fn manager() -> TokenSessionManager {
        manager_with(Arc::new(InMemoryRefreshTokenStore::new()))
    }

    /// Store whose backend is always down
    struct UnavailableStore;

    #[async_trait]
    impl RefreshTokenStore for UnavailableStore {
        async fn create(&self, _: i64, _: Duration) -> Result<String, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn consume_and_replace(
            &self,
            _: &str,
            _: Duration,
        ) -> Result<RotatedToken, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn revoke(&self, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn purge(&self) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_issue_pair() {
        let manager = manager();
        let pair = manager.issue_pair(42).await.unwrap();

        let claims = manager
            .codec()
            .verify(&pair.access_token, ACCESS_TOKEN_TYPE)
            .unwrap();
        assert_eq!(claims.user_id, 42);
        assert!(!pair.refresh_token.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_binds_same_subject() {
        let manager = manager();
        let pair = manager.issue_pair(42).await.unwrap();

        let refreshed = manager.refresh_pair(&pair.refresh_token).await.unwrap();
        let claims = manager
            .codec()
            .verify(&refreshed.access_token, ACCESS_TOKEN_TYPE)
            .unwrap();

        assert_eq!(claims.user_id, 42);
        assert_eq!(refreshed.user_id, 42);
        assert_ne!(refreshed.refresh_token, pair.refresh_token);
    }

    #[tokio::test]
    async fn test_refresh_token_single_use() {
        let manager = manager();
        let pair = manager.issue_pair(42).await.unwrap();

        manager.refresh_pair(&pair.refresh_token).await.unwrap();
        assert!(matches!(
            manager.refresh_pair(&pair.refresh_token).await,
            Err(SessionError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_rotated_token_chain() {
        let manager = manager();
        let mut pair = manager.issue_pair(5).await.unwrap();

        for _ in 0..3 {
            pair = manager.refresh_pair(&pair.refresh_token).await.unwrap();
        }
        let claims = manager
            .codec()
            .verify(&pair.access_token, ACCESS_TOKEN_TYPE)
            .unwrap();
        assert_eq!(claims.user_id, 5);
    }

    #[tokio::test]
    async fn test_unknown_refresh_token() {
        assert!(matches!(
            manager().refresh_pair("not-a-token").await,
            Err(SessionError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_expired_refresh_token() {
        let manager = manager();
        let pair = manager
            .issue_pair_with(42, ACCESS, Duration::ZERO)
            .await
            .unwrap();

        assert!(matches!(
            manager.refresh_pair(&pair.refresh_token).await,
            Err(SessionError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_store_failure_returns_no_pair() {
        let manager = manager_with(Arc::new(UnavailableStore));

        assert!(matches!(
            manager.issue_pair(42).await,
            Err(SessionError::Store(_))
        ));
        assert!(matches!(
            manager.refresh_pair("anything").await,
            Err(SessionError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_signing_failure_writes_no_refresh_record() {
        let store = Arc::new(InMemoryRefreshTokenStore::new());
        let manager = manager_with(store.clone());

        assert!(matches!(
            manager.issue_pair_with(42, Duration::ZERO, REFRESH).await,
            Err(SessionError::InvalidValidity)
        ));
        assert_eq!(store.active_count(), 0);
    }

    #[tokio::test]
    async fn test_bad_access_validity_keeps_refresh_token() {
        let manager = manager();
        let pair = manager.issue_pair(42).await.unwrap();

        assert!(matches!(
            manager
                .refresh_pair_with(&pair.refresh_token, Duration::ZERO, REFRESH)
                .await,
            Err(SessionError::InvalidValidity)
        ));
        assert!(manager.refresh_pair(&pair.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_revoke() {
        let manager = manager();
        let pair = manager.issue_pair(42).await.unwrap();

        manager.revoke(&pair.refresh_token).await.unwrap();
        assert!(matches!(
            manager.refresh_pair(&pair.refresh_token).await,
            Err(SessionError::InvalidToken)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refresh_single_winner() {
        let store = Arc::new(InMemoryRefreshTokenStore::new());
        let manager = manager_with(store.clone());
        let pair = manager.issue_pair(42).await.unwrap();

        let (a, b) = tokio::join!(
            manager.refresh_pair(&pair.refresh_token),
            manager.refresh_pair(&pair.refresh_token),
        );

        assert!(a.is_ok() ^ b.is_ok());
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(SessionError::InvalidToken)));
        assert_eq!(store.active_count(), 1);
    }
}
