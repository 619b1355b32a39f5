//! Durable user and refresh-session storage.
//!
//! [`PgStore`] is the production implementation; [`MemoryStore`] backs
//! orchestrator and router tests without a live database.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use thiserror::Error;

use crate::models::{RefreshSession, User};
use crate::token::{TokenError, TokenMaker, TokenPair, hash_token};

/// Inputs for creating a user. The password arrives pre-hashed; the store
/// never sees a plaintext password.
#[derive(Debug, Clone)]
pub struct CreateUserParams {
    pub name: String,
    pub email: String,
    pub password_digest: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique-constraint violation on the email column.
    #[error("email already exists")]
    DuplicateEmail,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Storage contract for users and the one-live-refresh-session-per-user
/// invariant. Lookups return `Ok(None)` for absent rows; the caller decides
/// what absence means.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Atomic registration: insert the user, mint the token pair, and record
    /// the refresh session (digest at rest), all in one transaction. Any
    /// failure rolls the whole thing back; a committed user row without its
    /// session row is never observable.
    async fn register_tx(
        &self,
        params: CreateUserParams,
        maker: &dyn TokenMaker,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<(User, TokenPair), StoreError>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Insert-or-replace the refresh session keyed by user. A new login
    /// replaces the prior session rather than appending.
    async fn upsert_refresh_session(
        &self,
        user_id: i64,
        token_digest: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Lookup requiring both the user and the digest to match, so a stolen
    /// session row cannot validate an unrelated token.
    async fn get_refresh_session(
        &self,
        user_id: i64,
        token_digest: &str,
    ) -> Result<Option<RefreshSession>, StoreError>;

    async fn delete_refresh_session(&self, token_digest: &str) -> Result<(), StoreError>;
}

fn map_user_insert_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StoreError::DuplicateEmail;
        }
    }
    StoreError::Db(e)
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn register_tx(
        &self,
        params: CreateUserParams,
        maker: &dyn TokenMaker,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<(User, TokenPair), StoreError> {
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (name, email, password_digest) VALUES ($1, $2, $3) \
             RETURNING id, name, email, password_digest, created_at, updated_at",
        )
        .bind(&params.name)
        .bind(&params.email)
        .bind(&params.password_digest)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_user_insert_error)?;

        let pair = maker.create_token(&user, access_ttl, refresh_ttl)?;

        let expires_at = DateTime::<Utc>::from_timestamp(pair.refresh_claims.exp, 0)
            .unwrap_or_else(Utc::now);
        sqlx::query(
            "INSERT INTO refresh_sessions (user_id, token_digest, expires_at) \
             VALUES ($1, $2, $3)",
        )
        .bind(user.id)
        .bind(hash_token(&pair.refresh_token))
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((user, pair))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, email, password_digest, created_at, updated_at \
             FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn upsert_refresh_session(
        &self,
        user_id: i64,
        token_digest: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO refresh_sessions (user_id, token_digest, expires_at) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (user_id) DO UPDATE \
             SET token_digest = EXCLUDED.token_digest, \
                 expires_at = EXCLUDED.expires_at, \
                 updated_at = now()",
        )
        .bind(user_id)
        .bind(token_digest)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_refresh_session(
        &self,
        user_id: i64,
        token_digest: &str,
    ) -> Result<Option<RefreshSession>, StoreError> {
        let session = sqlx::query_as::<_, RefreshSession>(
            "SELECT id, user_id, token_digest, expires_at, created_at, updated_at \
             FROM refresh_sessions WHERE user_id = $1 AND token_digest = $2",
        )
        .bind(user_id)
        .bind(token_digest)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn delete_refresh_session(&self, token_digest: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM refresh_sessions WHERE token_digest = $1")
            .bind(token_digest)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-memory store with the same contract, including transactional
/// all-or-nothing registration and an injectable session-insert fault for
/// exercising the rollback path.
#[derive(Default)]
pub struct MemoryStore {
    inner: std::sync::Mutex<MemoryInner>,
    fail_next_session_insert: std::sync::atomic::AtomicBool,
}

#[derive(Default)]
struct MemoryInner {
    next_user_id: i64,
    next_session_id: i64,
    users: Vec<User>,
    sessions: Vec<RefreshSession>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `register_tx` fail after the user insert, as if the
    /// session insert hit a database error.
    pub fn fail_next_session_insert(&self) {
        self.fail_next_session_insert
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Number of stored users (for asserting rollback).
    pub fn user_count(&self) -> usize {
        self.inner.lock().expect("store lock").users.len()
    }

    /// Session row for a user, if any.
    pub fn session_for_user(&self, user_id: i64) -> Option<RefreshSession> {
        self.inner
            .lock()
            .expect("store lock")
            .sessions
            .iter()
            .find(|s| s.user_id == user_id)
            .cloned()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn register_tx(
        &self,
        params: CreateUserParams,
        maker: &dyn TokenMaker,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<(User, TokenPair), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");

        if inner.users.iter().any(|u| u.email == params.email) {
            return Err(StoreError::DuplicateEmail);
        }

        inner.next_user_id += 1;
        let now = Utc::now();
        let user = User {
            id: inner.next_user_id,
            name: params.name,
            email: params.email,
            password_digest: params.password_digest,
            created_at: now,
            updated_at: now,
        };

        let pair = maker.create_token(&user, access_ttl, refresh_ttl)?;

        if self
            .fail_next_session_insert
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            // Nothing was pushed yet, so dropping here is the rollback.
            return Err(StoreError::Db(sqlx::Error::PoolClosed));
        }

        inner.next_session_id += 1;
        let session = RefreshSession {
            id: inner.next_session_id,
            user_id: user.id,
            token_digest: hash_token(&pair.refresh_token),
            expires_at: DateTime::<Utc>::from_timestamp(pair.refresh_claims.exp, 0)
                .unwrap_or(now),
            created_at: now,
            updated_at: now,
        };
        inner.users.push(user.clone());
        inner.sessions.push(session);

        Ok((user, pair))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .inner
            .lock()
            .expect("store lock")
            .users
            .iter()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn upsert_refresh_session(
        &self,
        user_id: i64,
        token_digest: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        let now = Utc::now();
        if let Some(session) = inner.sessions.iter_mut().find(|s| s.user_id == user_id) {
            session.token_digest = token_digest.to_string();
            session.expires_at = expires_at;
            session.updated_at = now;
        } else {
            inner.next_session_id += 1;
            let session = RefreshSession {
                id: inner.next_session_id,
                user_id,
                token_digest: token_digest.to_string(),
                expires_at,
                created_at: now,
                updated_at: now,
            };
            inner.sessions.push(session);
        }
        Ok(())
    }

    async fn get_refresh_session(
        &self,
        user_id: i64,
        token_digest: &str,
    ) -> Result<Option<RefreshSession>, StoreError> {
        Ok(self
            .inner
            .lock()
            .expect("store lock")
            .sessions
            .iter()
            .find(|s| s.user_id == user_id && s.token_digest == token_digest)
            .cloned())
    }

    async fn delete_refresh_session(&self, token_digest: &str) -> Result<(), StoreError> {
        self.inner
            .lock()
            .expect("store lock")
            .sessions
            .retain(|s| s.token_digest != token_digest);
        Ok(())
    }
}
