//! Authentication service: coordinates password verification, token
//! issuance, session persistence, and cache invalidation across the
//! register/login/logout/refresh/me flows.
//!
//! "State" here is the set of side effects committed per call, not a
//! long-lived machine. The one multi-statement transaction is registration,
//! owned by the store.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{error, warn};

use crate::cache::{RevocationCache, access_key};
use crate::models::User;
use crate::password;
use crate::store::{CreateUserParams, SessionStore, StoreError};
use crate::token::{AccessClaims, TokenMaker, TokenPair, hash_token};

/// Orchestrator-level error taxonomy. Every collaborator failure is wrapped
/// into exactly one of these kinds; the original cause is logged here, so
/// callers only ever see the sanitized message.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

pub struct AuthService {
    store: Arc<dyn SessionStore>,
    cache: Arc<dyn RevocationCache>,
    maker: Arc<dyn TokenMaker>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        cache: Arc<dyn RevocationCache>,
        maker: Arc<dyn TokenMaker>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            maker,
            access_ttl,
            refresh_ttl,
        }
    }

    /// Register a new account: hash the password, create the user and its
    /// refresh session atomically, then install the revocation-cache entry.
    ///
    /// The cache write happens after the transaction commits. If it fails
    /// the user exists but the error still surfaces as `Internal`; the
    /// client retries with a login.
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        plain_password: &str,
    ) -> Result<(User, TokenPair), AuthError> {
        let password_digest = password::hash(plain_password).map_err(|e| {
            error!(error = %e, "password hashing failed");
            AuthError::Internal("failed to process user password".into())
        })?;

        let params = CreateUserParams {
            name: name.to_string(),
            email: email.to_string(),
            password_digest,
        };

        let (user, pair) = self
            .store
            .register_tx(params, self.maker.as_ref(), self.access_ttl, self.refresh_ttl)
            .await
            .map_err(|e| match e {
                StoreError::DuplicateEmail => AuthError::Conflict("email already exists".into()),
                other => {
                    error!(error = %other, "registration failed");
                    AuthError::Internal("failed to register user".into())
                }
            })?;

        self.install_jti(&pair.access_claims, user.id).await?;

        Ok((user, pair))
    }

    /// Authenticate with email and password and rotate the refresh session.
    /// The previous cache entry is deleted before the new one is installed,
    /// so two access tokens are never simultaneously valid.
    pub async fn login(
        &self,
        email: &str,
        plain_password: &str,
    ) -> Result<(User, TokenPair), AuthError> {
        let user = self
            .store
            .get_user_by_email(email)
            .await
            .map_err(|e| {
                error!(error = %e, "user lookup failed");
                AuthError::Internal("failed to get user".into())
            })?
            .ok_or_else(|| AuthError::NotFound("user not found".into()))?;

        let password_ok = password::verify(plain_password, &user.password_digest)
            .map_err(|e| {
                error!(error = %e, "password verification failed");
                AuthError::Internal("failed to verify password".into())
            })?;
        if !password_ok {
            return Err(AuthError::Unauthorized("wrong password".into()));
        }

        let pair = self
            .maker
            .create_token(&user, self.access_ttl, self.refresh_ttl)
            .map_err(|e| {
                error!(error = %e, "token minting failed");
                AuthError::Internal("failed to login user".into())
            })?;

        let expires_at = DateTime::<Utc>::from_timestamp(pair.refresh_claims.exp, 0)
            .unwrap_or_else(Utc::now);
        self.store
            .upsert_refresh_session(user.id, &hash_token(&pair.refresh_token), expires_at)
            .await
            .map_err(|e| {
                error!(error = %e, "refresh session upsert failed");
                AuthError::Internal("failed to login user".into())
            })?;

        // Invalidate the previous access token before installing the new
        // entry; closes the window where two jtis could both pass the gate.
        self.cache.del(&access_key(user.id)).await.map_err(|e| {
            error!(error = %e, "cache delete failed");
            AuthError::Internal("failed to login user".into())
        })?;

        self.install_jti(&pair.access_claims, user.id).await?;

        Ok((user, pair))
    }

    /// End the session identified by (user, refresh token). An unknown or
    /// already-rotated refresh token is an error, not a no-op. Deleting the
    /// cache entry immediately invalidates the still-unexpired access token.
    pub async fn logout(&self, refresh_token: &str, user_id: i64) -> Result<(), AuthError> {
        let digest = hash_token(refresh_token);

        self.store
            .get_refresh_session(user_id, &digest)
            .await
            .map_err(|e| {
                error!(error = %e, "refresh session lookup failed");
                AuthError::Internal("failed to logout user".into())
            })?
            .ok_or_else(|| AuthError::NotFound("refresh token not found".into()))?;

        self.store
            .delete_refresh_session(&digest)
            .await
            .map_err(|e| {
                error!(error = %e, "refresh session delete failed");
                AuthError::Internal("failed to logout user".into())
            })?;

        self.cache.del(&access_key(user_id)).await.map_err(|e| {
            error!(error = %e, "cache delete failed");
            AuthError::Internal("failed to logout user".into())
        })?;

        Ok(())
    }

    /// Mint a new access token against an existing refresh session. The
    /// supplied jti is reused unchanged so the cache entry keyed by it stays
    /// valid, and the refresh token itself is not rotated. No cache write
    /// happens here, which also means the entry's TTL is not extended.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
        email: &str,
        user_id: i64,
        jti: &str,
    ) -> Result<String, AuthError> {
        let digest = hash_token(refresh_token);

        self.store
            .get_refresh_session(user_id, &digest)
            .await
            .map_err(|e| {
                error!(error = %e, "refresh session lookup failed");
                AuthError::Internal("failed to refresh token".into())
            })?
            .ok_or_else(|| AuthError::NotFound("refresh token not found".into()))?;

        self.maker
            .refresh_access_token(email, user_id, self.access_ttl, jti)
            .map_err(|e| {
                error!(error = %e, "access token refresh failed");
                AuthError::Internal("failed to refresh token".into())
            })
    }

    /// Profile lookup by email. Pure read.
    pub async fn me(&self, email: &str) -> Result<User, AuthError> {
        self.store
            .get_user_by_email(email)
            .await
            .map_err(|e| {
                error!(error = %e, "user lookup failed");
                AuthError::Internal("failed to get user".into())
            })?
            .ok_or_else(|| AuthError::NotFound("user not found".into()))
    }

    /// Write `user:access:{id} -> jti` with TTL = time until the access
    /// token expires, floored at one second if the expiry is already past.
    async fn install_jti(&self, claims: &AccessClaims, user_id: i64) -> Result<(), AuthError> {
        let remaining = claims.exp - Utc::now().timestamp();
        let ttl = if remaining > 0 {
            std::time::Duration::from_secs(remaining as u64)
        } else {
            warn!(user_id, "access token already expired when caching jti");
            std::time::Duration::from_secs(1)
        };

        self.cache
            .set(&access_key(user_id), &claims.jti, ttl)
            .await
            .map_err(|e| {
                error!(error = %e, user_id, "cache set failed");
                AuthError::Internal("failed to record access token".into())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::store::MemoryStore;
    use crate::token::Hs256Maker;

    struct Fixture {
        service: AuthService,
        store: Arc<MemoryStore>,
        cache: Arc<InMemoryCache>,
        maker: Arc<Hs256Maker>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(InMemoryCache::new());
        let maker = Arc::new(Hs256Maker::new("test-secret-key", "keygate-test"));
        let service = AuthService::new(
            store.clone(),
            cache.clone(),
            maker.clone(),
            Duration::minutes(30),
            Duration::days(7),
        );
        Fixture {
            service,
            store,
            cache,
            maker,
        }
    }

    #[tokio::test]
    async fn register_creates_user_session_and_cache_entry() {
        let fx = fixture();
        let (user, pair) = fx
            .service
            .register("Ann", "ann@x.com", "secret1")
            .await
            .expect("register");

        assert_eq!(user.email, "ann@x.com");
        assert!(!pair.access_token.is_empty());
        assert!(!pair.refresh_token.is_empty());

        // Session row exists and stores a digest, never the raw token.
        let session = fx.store.session_for_user(user.id).expect("session row");
        assert_ne!(session.token_digest, pair.refresh_token);
        assert_eq!(session.token_digest, hash_token(&pair.refresh_token));

        // Cache holds the access token's jti.
        let cached = fx.cache.get(&access_key(user.id)).await.unwrap();
        assert_eq!(cached, Some(pair.access_claims.jti));
    }

    #[tokio::test]
    async fn register_duplicate_email_is_conflict() {
        let fx = fixture();
        fx.service
            .register("Ann", "ann@x.com", "secret1")
            .await
            .unwrap();
        match fx.service.register("Other Ann", "ann@x.com", "secret2").await {
            Err(AuthError::Conflict(_)) => {}
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn register_rolls_back_user_when_session_insert_fails() {
        let fx = fixture();
        fx.store.fail_next_session_insert();

        match fx.service.register("Ann", "ann@x.com", "secret1").await {
            Err(AuthError::Internal(_)) => {}
            other => panic!("expected Internal, got {other:?}"),
        }
        assert_eq!(fx.store.user_count(), 0, "user row must be rolled back");

        // A retry after the fault succeeds.
        fx.service
            .register("Ann", "ann@x.com", "secret1")
            .await
            .expect("retry register");
        assert_eq!(fx.store.user_count(), 1);
    }

    #[tokio::test]
    async fn register_surfaces_cache_failure_after_commit() {
        let fx = fixture();
        fx.cache.fail_next_set();

        match fx.service.register("Ann", "ann@x.com", "secret1").await {
            Err(AuthError::Internal(_)) => {}
            other => panic!("expected Internal, got {other:?}"),
        }
        // The transaction committed before the cache write; the user stays.
        assert_eq!(fx.store.user_count(), 1);

        // The client recovers with a login, which reinstalls the entry.
        let (user, pair) = fx.service.login("ann@x.com", "secret1").await.expect("login");
        let cached = fx.cache.get(&access_key(user.id)).await.unwrap();
        assert_eq!(cached, Some(pair.access_claims.jti));
    }

    #[tokio::test]
    async fn login_surfaces_cache_failure_after_revoking_previous_entry() {
        let fx = fixture();
        let (user, _) = fx
            .service
            .register("Ann", "ann@x.com", "secret1")
            .await
            .unwrap();

        fx.cache.fail_next_set();
        match fx.service.login("ann@x.com", "secret1").await {
            Err(AuthError::Internal(_)) => {}
            other => panic!("expected Internal, got {other:?}"),
        }
        // The delete ran before the failing set, so no access token is valid
        // until a later login succeeds.
        assert_eq!(fx.cache.get(&access_key(user.id)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn login_wrong_password_is_unauthorized_with_no_side_effects() {
        let fx = fixture();
        let (user, first) = fx
            .service
            .register("Ann", "ann@x.com", "secret1")
            .await
            .unwrap();
        let session_before = fx.store.session_for_user(user.id).unwrap();

        match fx.service.login("ann@x.com", "wrong").await {
            Err(AuthError::Unauthorized(_)) => {}
            other => panic!("expected Unauthorized, got {other:?}"),
        }

        // Neither the session row nor the cache entry changed.
        let session_after = fx.store.session_for_user(user.id).unwrap();
        assert_eq!(session_before.token_digest, session_after.token_digest);
        let cached = fx.cache.get(&access_key(user.id)).await.unwrap();
        assert_eq!(cached, Some(first.access_claims.jti));
    }

    #[tokio::test]
    async fn login_unknown_email_is_not_found() {
        let fx = fixture();
        match fx.service.login("ghost@x.com", "secret1").await {
            Err(AuthError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_login_invalidates_first_access_token() {
        let fx = fixture();
        let (user, _) = fx
            .service
            .register("Ann", "ann@x.com", "secret1")
            .await
            .unwrap();

        let (_, first) = fx.service.login("ann@x.com", "secret1").await.unwrap();
        let (_, second) = fx.service.login("ann@x.com", "secret1").await.unwrap();

        let cached = fx.cache.get(&access_key(user.id)).await.unwrap();
        assert_eq!(cached, Some(second.access_claims.jti.clone()));
        assert_ne!(first.access_claims.jti, second.access_claims.jti);

        // The user row survives rotation.
        assert!(
            fx.service.me("ann@x.com").await.is_ok(),
            "user must not be deleted by re-login"
        );
    }

    #[tokio::test]
    async fn logout_removes_session_and_cache_entry() {
        let fx = fixture();
        let (user, pair) = fx
            .service
            .register("Ann", "ann@x.com", "secret1")
            .await
            .unwrap();

        fx.service
            .logout(&pair.refresh_token, user.id)
            .await
            .expect("logout");

        assert!(fx.store.session_for_user(user.id).is_none());
        let cached = fx.cache.get(&access_key(user.id)).await.unwrap();
        assert_eq!(cached, None, "revocation entry must be gone");

        // Even though the access token still verifies, the gate's cache
        // check now fails: the signature is intact but the entry is absent.
        assert!(fx.maker.verify_access_token(&pair.access_token).is_ok());
    }

    #[tokio::test]
    async fn logout_of_unknown_refresh_token_is_not_found() {
        let fx = fixture();
        let (user, _) = fx
            .service
            .register("Ann", "ann@x.com", "secret1")
            .await
            .unwrap();
        match fx.service.logout("never-issued", user.id).await {
            Err(AuthError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_preserves_jti_and_leaves_session_untouched() {
        let fx = fixture();
        let (user, pair) = fx
            .service
            .register("Ann", "ann@x.com", "secret1")
            .await
            .unwrap();
        let session_before = fx.store.session_for_user(user.id).unwrap();

        let new_access = fx
            .service
            .refresh_access_token(
                &pair.refresh_token,
                &user.email,
                user.id,
                &pair.access_claims.jti,
            )
            .await
            .expect("refresh");

        let claims = fx.maker.verify_access_token(&new_access).unwrap();
        assert_eq!(claims.jti, pair.access_claims.jti);

        // No rotation on refresh: the session row is unchanged and the old
        // refresh token still matches it.
        let session_after = fx.store.session_for_user(user.id).unwrap();
        assert_eq!(session_before.token_digest, session_after.token_digest);
    }

    #[tokio::test]
    async fn refresh_with_unknown_token_is_not_found() {
        let fx = fixture();
        let (user, _) = fx
            .service
            .register("Ann", "ann@x.com", "secret1")
            .await
            .unwrap();
        match fx
            .service
            .refresh_access_token("rotated-away", &user.email, user.id, "some-jti")
            .await
        {
            Err(AuthError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn me_returns_user_or_not_found() {
        let fx = fixture();
        fx.service
            .register("Ann", "ann@x.com", "secret1")
            .await
            .unwrap();

        let user = fx.service.me("ann@x.com").await.expect("me");
        assert_eq!(user.name, "Ann");

        assert!(matches!(
            fx.service.me("ghost@x.com").await,
            Err(AuthError::NotFound(_))
        ));
    }
}
