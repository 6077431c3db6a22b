//! Credential directory
//!
//! The minimal user store behind login: a username, an email and a password
//! record per subject. Nothing else about users lives here.

use async_trait::async_trait;
use authgate_core::{unique_violation_fields, FieldErrors};
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Mutex;
use thiserror::Error;

/// Stored credentials
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Credentials for a new account
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Directory errors
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("{0}")]
    Duplicate(FieldErrors),

    #[error("User directory unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Insert a user; duplicate username or email yields `Duplicate`
    async fn create(&self, user: NewUser) -> Result<UserRecord, DirectoryError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, DirectoryError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>, DirectoryError>;

    /// Replace a password record, e.g. after the hashing parameters changed
    async fn update_password_hash(
        &self,
        id: i64,
        password_hash: &str,
    ) -> Result<(), DirectoryError>;
}

// ============================================================================
// In-memory directory
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: Mutex<BTreeMap<i64, UserRecord>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn users(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<i64, UserRecord>>, DirectoryError> {
        self.users
            .lock()
            .map_err(|_| DirectoryError::Unavailable("user map lock poisoned".to_string()))
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn create(&self, user: NewUser) -> Result<UserRecord, DirectoryError> {
        let mut users = self.users()?;

        let mut duplicates = FieldErrors::default();
        if users.values().any(|u| u.username == user.username) {
            duplicates.add("username", "username is already in use");
        }
        if users.values().any(|u| u.email == user.email) {
            duplicates.add("email", "email is already in use");
        }
        if !duplicates.is_empty() {
            return Err(DirectoryError::Duplicate(duplicates));
        }

        let id = users.keys().next_back().map_or(1, |last| last + 1);
        let record = UserRecord {
            id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
        };
        users.insert(id, record.clone());
        Ok(record)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, DirectoryError> {
        Ok(self
            .users()?
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>, DirectoryError> {
        Ok(self.users()?.get(&id).cloned())
    }

    async fn update_password_hash(
        &self,
        id: i64,
        password_hash: &str,
    ) -> Result<(), DirectoryError> {
        if let Some(user) = self.users()?.get_mut(&id) {
            user.password_hash = password_hash.to_string();
        }
        Ok(())
    }
}

// ============================================================================
// PostgreSQL directory
// ============================================================================

#[derive(Debug, Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn database_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> DirectoryError {
    move |e| match unique_violation_fields(&e) {
        Some(fields) => DirectoryError::Duplicate(fields),
        None => {
            tracing::error!(error = %e, "{context}");
            DirectoryError::Unavailable(format!("{context}: {e}"))
        }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn create(&self, user: NewUser) -> Result<UserRecord, DirectoryError> {
        sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (username, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, username, email, password_hash
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(database_error("Failed to create user"))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, DirectoryError> {
        sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, email, password_hash FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error("Failed to fetch user"))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>, DirectoryError> {
        sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, email, password_hash FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error("Failed to fetch user"))
    }

    async fn update_password_hash(
        &self,
        id: i64,
        password_hash: &str,
    ) -> Result<(), DirectoryError> {
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .await
            .map_err(database_error("Failed to update password"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: "argon2$argon2id$v=19$m=8,t=1,p=1$c2FsdHNhbHQ$aGFzaA".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let directory = InMemoryUserDirectory::new();
        let alice = directory
            .create(new_user("alice", "alice@example.com"))
            .await
            .unwrap();
        let bob = directory
            .create(new_user("bob", "bob@example.com"))
            .await
            .unwrap();

        assert_eq!(alice.id, 1);
        assert_eq!(bob.id, 2);
        assert_eq!(
            directory.find_by_username("alice").await.unwrap(),
            Some(alice.clone())
        );
        assert_eq!(directory.find_by_id(2).await.unwrap(), Some(bob));
        assert_eq!(directory.find_by_username("carol").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicates_reported_per_field() {
        let directory = InMemoryUserDirectory::new();
        directory
            .create(new_user("alice", "alice@example.com"))
            .await
            .unwrap();

        match directory
            .create(new_user("alice", "alice@example.com"))
            .await
        {
            Err(DirectoryError::Duplicate(fields)) => {
                assert_eq!(
                    fields.to_string(),
                    "email: email is already in use; username: username is already in use"
                );
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update_password_hash() {
        let directory = InMemoryUserDirectory::new();
        let alice = directory
            .create(new_user("alice", "alice@example.com"))
            .await
            .unwrap();

        directory
            .update_password_hash(alice.id, "replacement")
            .await
            .unwrap();
        let stored = directory.find_by_id(alice.id).await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "replacement");
    }
}
