//! Refresh token persistence
//!
//! Refresh tokens are opaque 256-bit random values. Only their SHA-256 digest
//! is stored. Rotation is a single atomic step per presented token: the old
//! record is marked consumed and its replacement is created, or nothing
//! changes at all.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Random bytes per refresh token
pub const REFRESH_TOKEN_BYTES: usize = 32;

/// Refresh token store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Refresh token not found")]
    NotFound,

    #[error("Refresh token has already been used")]
    AlreadyConsumed,

    #[error("Refresh token has expired")]
    Expired,

    #[error("Refresh token validity is out of range")]
    InvalidValidity,

    #[error("Refresh token store unavailable: {0}")]
    Unavailable(String),
}

/// Result of a successful rotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotatedToken {
    /// The replacement refresh token
    pub token: String,
    /// Subject the consumed token belonged to
    pub user_id: i64,
}

/// Persistence contract for refresh tokens
///
/// `consume_and_replace` must be atomic per presented token: among concurrent
/// callers presenting the same value exactly one succeeds and the rest get
/// [`StoreError::AlreadyConsumed`].
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Create a new active token for `user_id`
    async fn create(&self, user_id: i64, validity: Duration) -> Result<String, StoreError>;

    /// Consume `old` and create its replacement for the same subject
    async fn consume_and_replace(
        &self,
        old: &str,
        validity: Duration,
    ) -> Result<RotatedToken, StoreError>;

    /// Consume `token` without a replacement. Unknown or used tokens are ignored.
    async fn revoke(&self, token: &str) -> Result<(), StoreError>;

    /// Delete consumed and expired records, returning how many were removed
    async fn purge(&self) -> Result<u64, StoreError>;
}

/// Run [`RefreshTokenStore::purge`] every `period` until the handle is aborted
///
/// The first purge happens one full period after spawning. `period` must be
/// non-zero.
pub fn spawn_purge_task(
    store: Arc<dyn RefreshTokenStore>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.purge().await {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "Purged dead refresh tokens"),
                Err(e) => tracing::warn!(error = %e, "Refresh token purge failed"),
            }
        }
    })
}

/// Generate a new opaque refresh token
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash a token for storage (simple SHA-256)
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn expiry_from(now: DateTime<Utc>, validity: Duration) -> Result<DateTime<Utc>, StoreError> {
    chrono::Duration::from_std(validity)
        .ok()
        .and_then(|validity| now.checked_add_signed(validity))
        .ok_or(StoreError::InvalidValidity)
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Clone)]
struct TokenRecord {
    user_id: i64,
    expires_at: DateTime<Utc>,
    consumed: bool,
}

/// Single-process store; the map lock makes rotation atomic
#[derive(Debug, Default)]
pub struct InMemoryRefreshTokenStore {
    records: Mutex<HashMap<String, TokenRecord>>,
}

impl InMemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, TokenRecord>>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Unavailable("token map lock poisoned".to_string()))
    }

    /// Number of records still usable for rotation
    pub fn active_count(&self) -> usize {
        let now = Utc::now();
        self.records()
            .map(|records| {
                records
                    .values()
                    .filter(|r| !r.consumed && r.expires_at > now)
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn create(&self, user_id: i64, validity: Duration) -> Result<String, StoreError> {
        let expires_at = expiry_from(Utc::now(), validity)?;
        let token = generate_refresh_token();

        self.records()?.insert(
            hash_token(&token),
            TokenRecord {
                user_id,
                expires_at,
                consumed: false,
            },
        );
        Ok(token)
    }

    async fn consume_and_replace(
        &self,
        old: &str,
        validity: Duration,
    ) -> Result<RotatedToken, StoreError> {
        let now = Utc::now();
        let expires_at = expiry_from(now, validity)?;
        let mut records = self.records()?;

        let record = records.get_mut(&hash_token(old)).ok_or(StoreError::NotFound)?;
        if record.consumed {
            return Err(StoreError::AlreadyConsumed);
        }
        if now >= record.expires_at {
            return Err(StoreError::Expired);
        }
        record.consumed = true;
        let user_id = record.user_id;

        let token = generate_refresh_token();
        records.insert(
            hash_token(&token),
            TokenRecord {
                user_id,
                expires_at,
                consumed: false,
            },
        );

        Ok(RotatedToken { token, user_id })
    }

    async fn revoke(&self, token: &str) -> Result<(), StoreError> {
        if let Some(record) = self.records()?.get_mut(&hash_token(token)) {
            record.consumed = true;
        }
        Ok(())
    }

    async fn purge(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut records = self.records()?;
        let before = records.len();
        records.retain(|_, r| !r.consumed && r.expires_at > now);
        Ok((before - records.len()) as u64)
    }
}

// ============================================================================
// PostgreSQL store
// ============================================================================

/// Refresh token record from database
#[derive(Debug, Clone, sqlx::FromRow)]
struct RefreshTokenRow {
    id: i64,
    user_id: i64,
    expires_at: DateTime<Utc>,
    consumed_at: Option<DateTime<Utc>>,
}

/// PostgreSQL-backed store
///
/// Rotation locks the presented token's row (`SELECT ... FOR UPDATE`) inside a
/// transaction, so a concurrent rotation of the same token waits and then sees
/// it consumed.
#[derive(Debug, Clone)]
pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn unavailable(context: &str) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
    move |e| {
        tracing::error!(error = %e, "{context}");
        StoreError::Unavailable(format!("{context}: {e}"))
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn create(&self, user_id: i64, validity: Duration) -> Result<String, StoreError> {
        let expires_at = expiry_from(Utc::now(), validity)?;
        let token = generate_refresh_token();

        sqlx::query(
            "INSERT INTO refresh_tokens (user_id, token_hash, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(user_id)
        .bind(hash_token(&token))
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable("Failed to store refresh token"))?;

        Ok(token)
    }

    async fn consume_and_replace(
        &self,
        old: &str,
        validity: Duration,
    ) -> Result<RotatedToken, StoreError> {
        let now = Utc::now();
        let expires_at = expiry_from(now, validity)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(unavailable("Failed to begin rotation"))?;

        let row = sqlx::query_as::<_, RefreshTokenRow>(
            r#"
            SELECT id, user_id, expires_at, consumed_at
            FROM refresh_tokens
            WHERE token_hash = $1
            FOR UPDATE
            "#,
        )
        .bind(hash_token(old))
        .fetch_optional(&mut *tx)
        .await
        .map_err(unavailable("Failed to fetch refresh token"))?
        .ok_or(StoreError::NotFound)?;

        // Dropping `tx` on the early returns rolls back and releases the lock.
        if row.consumed_at.is_some() {
            return Err(StoreError::AlreadyConsumed);
        }
        if now >= row.expires_at {
            return Err(StoreError::Expired);
        }

        sqlx::query("UPDATE refresh_tokens SET consumed_at = $2 WHERE id = $1")
            .bind(row.id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(unavailable("Failed to consume refresh token"))?;

        let token = generate_refresh_token();
        sqlx::query(
            "INSERT INTO refresh_tokens (user_id, token_hash, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(row.user_id)
        .bind(hash_token(&token))
        .bind(expires_at)
        .execute(&mut *tx)
        .await
        .map_err(unavailable("Failed to store refresh token"))?;

        tx.commit()
            .await
            .map_err(unavailable("Failed to commit rotation"))?;

        Ok(RotatedToken {
            token,
            user_id: row.user_id,
        })
    }

    async fn revoke(&self, token: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE refresh_tokens SET consumed_at = NOW()
            WHERE token_hash = $1 AND consumed_at IS NULL
            "#,
        )
        .bind(hash_token(token))
        .execute(&self.pool)
        .await
        .map_err(unavailable("Failed to revoke refresh token"))?;

        Ok(())
    }

    async fn purge(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM refresh_tokens WHERE consumed_at IS NOT NULL OR expires_at <= NOW()",
        )
        .execute(&self.pool)
        .await
        .map_err(unavailable("Failed to purge refresh tokens"))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[test]
    fn test_generated_token_shape() {
        let token = generate_refresh_token();
        assert_eq!(URL_SAFE_NO_PAD.decode(&token).unwrap().len(), REFRESH_TOKEN_BYTES);
        assert_ne!(token, generate_refresh_token());
    }

    #[test]
    fn test_hash_token() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_create_and_rotate() {
        let store = InMemoryRefreshTokenStore::new();
        let token = store.create(7, DAY).await.unwrap();

        let rotated = store.consume_and_replace(&token, DAY).await.unwrap();
        assert_eq!(rotated.user_id, 7);
        assert_ne!(rotated.token, token);
        assert_eq!(store.active_count(), 1);
    }

    #[tokio::test]
    async fn test_reuse_fails() {
        let store = InMemoryRefreshTokenStore::new();
        let token = store.create(7, DAY).await.unwrap();

        store.consume_and_replace(&token, DAY).await.unwrap();
        assert!(matches!(
            store.consume_and_replace(&token, DAY).await,
            Err(StoreError::AlreadyConsumed)
        ));
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let store = InMemoryRefreshTokenStore::new();
        assert!(matches!(
            store.consume_and_replace("never-issued", DAY).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_expired_token() {
        let store = InMemoryRefreshTokenStore::new();
        let token = store.create(7, Duration::ZERO).await.unwrap();

        assert!(matches!(
            store.consume_and_replace(&token, DAY).await,
            Err(StoreError::Expired)
        ));
        assert_eq!(store.active_count(), 0);
    }

    #[tokio::test]
    async fn test_revoke() {
        let store = InMemoryRefreshTokenStore::new();
        let token = store.create(7, DAY).await.unwrap();

        store.revoke(&token).await.unwrap();
        store.revoke("never-issued").await.unwrap();
        assert!(matches!(
            store.consume_and_replace(&token, DAY).await,
            Err(StoreError::AlreadyConsumed)
        ));
    }

    #[tokio::test]
    async fn test_purge() {
        let store = InMemoryRefreshTokenStore::new();
        let token = store.create(1, DAY).await.unwrap();
        store.create(2, Duration::ZERO).await.unwrap();
        store.consume_and_replace(&token, DAY).await.unwrap();

        assert_eq!(store.purge().await.unwrap(), 2);
        assert_eq!(store.active_count(), 1);
    }

    #[tokio::test]
    async fn test_long_rotation_chain_is_purged() {
        let store = InMemoryRefreshTokenStore::new();
        let mut token = store.create(3, DAY).await.unwrap();
        for _ in 0..100 {
            token = store.consume_and_replace(&token, DAY).await.unwrap().token;
        }

        assert_eq!(store.purge().await.unwrap(), 100);
        assert_eq!(store.purge().await.unwrap(), 0);
        assert_eq!(store.active_count(), 1);
        store.consume_and_replace(&token, DAY).await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_task_removes_dead_records() {
        let store = Arc::new(InMemoryRefreshTokenStore::new());
        let token = store.create(1, DAY).await.unwrap();
        store.consume_and_replace(&token, DAY).await.unwrap();
        store.create(2, Duration::ZERO).await.unwrap();

        let task = spawn_purge_task(store.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(200)).await;
        task.abort();

        assert_eq!(store.purge().await.unwrap(), 0);
        assert_eq!(store.active_count(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_validity() {
        let store = InMemoryRefreshTokenStore::new();
        assert!(matches!(
            store.create(1, Duration::MAX).await,
            Err(StoreError::InvalidValidity)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_rotation_single_winner() {
        let store = Arc::new(InMemoryRefreshTokenStore::new());
        let token = store.create(9, DAY).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let token = token.clone();
                tokio::spawn(async move { store.consume_and_replace(&token, DAY).await })
            })
            .collect();

        let results: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let winners = results.iter().filter(|r| r.is_ok()).count();
        let consumed = results
            .iter()
            .filter(|r| matches!(r, Err(StoreError::AlreadyConsumed)))
            .count();

        assert_eq!(winners, 1);
        assert_eq!(consumed, 15);
        assert_eq!(store.active_count(), 1);
    }
}
