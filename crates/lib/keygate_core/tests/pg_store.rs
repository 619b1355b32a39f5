//! Integration tests for the PostgreSQL store. Skipped unless
//! `DATABASE_URL` points at a reachable database; migrations run on entry.

use std::sync::Arc;

use chrono::{Duration, Utc};
use keygate_core::store::{CreateUserParams, PgStore, SessionStore, StoreError};
use keygate_core::token::{
    AccessClaims, Hs256Maker, RefreshClaims, TokenError, TokenMaker, TokenPair, hash_token,
};

async fn pg_store() -> Option<(PgStore, sqlx::PgPool)> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("DATABASE_URL not set, skipping PG integration test");
            return None;
        }
    };
    let pool = sqlx::PgPool::connect(&url).await.expect("connect");
    keygate_core::migrate::migrate(&pool).await.expect("migrate");
    Some((PgStore::new(pool.clone()), pool))
}

fn maker() -> Arc<Hs256Maker> {
    Arc::new(Hs256Maker::new("integration-secret", "keygate-test"))
}

fn params(email: &str) -> CreateUserParams {
    CreateUserParams {
        name: "Ann".into(),
        email: email.into(),
        password_digest: "$2b$10$not.a.real.digest.but.opaque.to.the.store".into(),
    }
}

/// Token maker that always fails to sign; used to trip the registration
/// transaction after the user insert.
struct FailingMaker;

impl TokenMaker for FailingMaker {
    fn create_token(
        &self,
        _user: &keygate_core::models::User,
        _access_ttl: Duration,
        _refresh_ttl: Duration,
    ) -> Result<TokenPair, TokenError> {
        Err(TokenError::Signing("injected fault".into()))
    }

    fn verify_access_token(&self, _token: &str) -> Result<AccessClaims, TokenError> {
        Err(TokenError::Invalid("unused".into()))
    }

    fn verify_refresh_token(&self, _token: &str) -> Result<RefreshClaims, TokenError> {
        Err(TokenError::Invalid("unused".into()))
    }

    fn refresh_access_token(
        &self,
        _email: &str,
        _user_id: i64,
        _access_ttl: Duration,
        _jti: &str,
    ) -> Result<String, TokenError> {
        Err(TokenError::Signing("injected fault".into()))
    }
}

#[tokio::test]
async fn register_commits_user_and_session_together() {
    let Some((store, _pool)) = pg_store().await else {
        return;
    };
    let email = format!("commit-{}@keygate.test", Utc::now().timestamp_micros());

    let (user, pair) = store
        .register_tx(
            params(&email),
            maker().as_ref(),
            Duration::minutes(30),
            Duration::days(7),
        )
        .await
        .expect("register_tx");

    assert_eq!(user.email, email);

    let session = store
        .get_refresh_session(user.id, &hash_token(&pair.refresh_token))
        .await
        .expect("session lookup")
        .expect("session row");
    assert_ne!(session.token_digest, pair.refresh_token);
}

#[tokio::test]
async fn failed_registration_rolls_back_user_row() {
    let Some((store, _pool)) = pg_store().await else {
        return;
    };
    let email = format!("rollback-{}@keygate.test", Utc::now().timestamp_micros());

    let result = store
        .register_tx(
            params(&email),
            &FailingMaker,
            Duration::minutes(30),
            Duration::days(7),
        )
        .await;
    assert!(matches!(result, Err(StoreError::Token(_))));

    let user = store.get_user_by_email(&email).await.expect("lookup");
    assert!(user.is_none(), "user row must roll back with the session");
}

#[tokio::test]
async fn duplicate_email_maps_to_duplicate_error() {
    let Some((store, _pool)) = pg_store().await else {
        return;
    };
    let email = format!("dup-{}@keygate.test", Utc::now().timestamp_micros());

    store
        .register_tx(
            params(&email),
            maker().as_ref(),
            Duration::minutes(30),
            Duration::days(7),
        )
        .await
        .expect("first register");

    let second = store
        .register_tx(
            params(&email),
            maker().as_ref(),
            Duration::minutes(30),
            Duration::days(7),
        )
        .await;
    assert!(matches!(second, Err(StoreError::DuplicateEmail)));
}

#[tokio::test]
async fn upsert_replaces_the_single_session_row() {
    let Some((store, _pool)) = pg_store().await else {
        return;
    };
    let email = format!("upsert-{}@keygate.test", Utc::now().timestamp_micros());

    let (user, pair) = store
        .register_tx(
            params(&email),
            maker().as_ref(),
            Duration::minutes(30),
            Duration::days(7),
        )
        .await
        .expect("register_tx");

    let new_digest = hash_token("a-rotated-refresh-token");
    store
        .upsert_refresh_session(user.id, &new_digest, Utc::now() + Duration::days(7))
        .await
        .expect("upsert");

    // Old digest no longer matches; the new one does.
    let old = store
        .get_refresh_session(user.id, &hash_token(&pair.refresh_token))
        .await
        .expect("lookup");
    assert!(old.is_none());
    let new = store
        .get_refresh_session(user.id, &new_digest)
        .await
        .expect("lookup");
    assert!(new.is_some());

    store
        .delete_refresh_session(&new_digest)
        .await
        .expect("delete");
    let gone = store
        .get_refresh_session(user.id, &new_digest)
        .await
        .expect("lookup");
    assert!(gone.is_none());
}
