//! Application state management
//!
//! Author: hephaex@gmail.com

use crate::auth::{
    spawn_purge_task, AccessTokenCodec, AuthGate, AuthGateConfig, AuthService, CommonPasswordSet,
    InMemoryRefreshTokenStore, InMemoryUserDirectory, PasswordHasher, PasswordValidator,
    PgRefreshTokenStore, PgUserDirectory, RefreshTokenStore, TokenSessionManager, UserDirectory,
};
use anyhow::Context;
use authgate_core::config::AppConfig;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Server start time
    pub start_time: Instant,
    /// Registration, login and token rotation
    pub auth: AuthService,
    /// Verification gate for protected routes
    pub gate: Arc<AuthGate>,
    /// Refresh token store behind `auth`, shared with the purge task
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    /// Whether state is persisted in PostgreSQL
    pub persistent: bool,
}

impl AppState {
    /// Build state backed by PostgreSQL when a pool is given, in-memory otherwise
    pub fn build(
        config: AppConfig,
        common: CommonPasswordSet,
        pool: Option<PgPool>,
    ) -> anyhow::Result<Self> {
        let persistent = pool.is_some();
        let (users, store): (Arc<dyn UserDirectory>, Arc<dyn RefreshTokenStore>) = match pool {
            Some(pool) => (
                Arc::new(PgUserDirectory::new(pool.clone())),
                Arc::new(PgRefreshTokenStore::new(pool)),
            ),
            None => (
                Arc::new(InMemoryUserDirectory::new()),
                Arc::new(InMemoryRefreshTokenStore::new()),
            ),
        };

        let codec = AccessTokenCodec::new(config.auth.jwt_secret.as_bytes());
        let gate_config =
            AuthGateConfig::from_config(&config.auth).context("Invalid auth header name")?;
        let gate = Arc::new(AuthGate::new(codec.clone(), gate_config));

        let sessions = TokenSessionManager::new(
            codec,
            store.clone(),
            Duration::from_secs(config.auth.access_token_ttl_secs),
            Duration::from_secs(config.auth.refresh_token_ttl_secs),
        );
        let hasher = PasswordHasher::from_config(&config.password);
        let validator = PasswordValidator::new(Arc::new(common), config.password.min_length);

        Ok(Self {
            auth: AuthService::new(users, hasher, validator, sessions),
            gate,
            refresh_tokens: store,
            config,
            start_time: Instant::now(),
            persistent,
        })
    }

    /// In-memory state with the embedded common password list
    pub fn in_memory(config: AppConfig) -> anyhow::Result<Self> {
        Self::build(config, CommonPasswordSet::embedded(), None)
    }

    /// Start deleting dead refresh tokens every `auth.purge_interval_secs`
    pub fn spawn_refresh_token_purge(&self) -> tokio::task::JoinHandle<()> {
        spawn_purge_task(
            self.refresh_tokens.clone(),
            Duration::from_secs(self.config.auth.purge_interval_secs),
        )
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
