//! Domain models owned by the persistence layer.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A registered account. The password digest never leaves the server; it is
/// skipped on serialization so handler responses cannot leak it.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_digest: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The single live refresh session for a user. Only a one-way digest of the
/// refresh token is stored, never the raw value.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshSession {
    pub id: i64,
    pub user_id: i64,
    pub token_digest: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
