//! Revocation cache: the source of truth for whether an access token's jti
//! is still the most recently issued one for its subject.
//!
//! Keys have the shape `user:access:{user_id}` and hold exactly the jti of
//! the currently-valid access token, TTL-bound to the token's remaining
//! lifetime. Absence or mismatch means the token is revoked even though its
//! signature still verifies.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;
use thiserror::Error;

/// Cache backend failure. Distinct from a miss, which is `Ok(None)`.
#[derive(Debug, Error)]
#[error("cache: {0}")]
pub struct CacheError(pub String);

/// Key for a user's currently-valid access-token jti.
pub fn access_key(user_id: i64) -> String {
    format!("user:access:{user_id}")
}

/// Key-value store tracking the single valid jti per user. All writes are
/// idempotent replacements; last writer wins.
#[async_trait]
pub trait RevocationCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    async fn del(&self, key: &str) -> Result<(), CacheError>;
}

/// Redis-backed cache using a multiplexed async connection.
#[derive(Clone)]
pub struct RedisCache {
    client: redis::Client,
}

impl RedisCache {
    /// Create a client for the given connection URL (e.g.
    /// `redis://localhost:6379`). Connections are established lazily.
    pub fn new(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|e| CacheError(e.to_string()))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError(e.to_string()))
    }
}

#[async_trait]
impl RevocationCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| CacheError(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        // Floor of 1s: SETEX rejects a zero expiry.
        let secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, secs)
            .await
            .map_err(|e| CacheError(e.to_string()))
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| CacheError(e.to_string()))
    }
}

/// In-process cache with the same TTL semantics. Used by tests and
/// single-node development setups.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    fail_next_set: std::sync::atomic::AtomicBool,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `set` fail, as if the backend dropped the connection.
    pub fn fail_next_set(&self) {
        self.fail_next_set
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl RevocationCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().expect("cache lock");
        match entries.get(key) {
            Some((_, deadline)) if *deadline <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        if self
            .fail_next_set
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(CacheError("injected cache failure".into()));
        }
        let ttl = ttl.max(Duration::from_secs(1));
        self.entries
            .lock()
            .expect("cache lock")
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().expect("cache lock").remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_key_shape() {
        assert_eq!(access_key(42), "user:access:42");
    }

    #[tokio::test]
    async fn in_memory_set_get_del() {
        let cache = InMemoryCache::new();
        let key = access_key(1);

        assert_eq!(cache.get(&key).await.unwrap(), None);

        cache
            .set(&key, "some-jti", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some("some-jti".into()));

        // Overwrite is an idempotent replacement.
        cache
            .set(&key, "newer-jti", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some("newer-jti".into()));

        cache.del(&key).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn del_of_absent_key_is_ok() {
        let cache = InMemoryCache::new();
        assert!(cache.del("user:access:999").await.is_ok());
    }
}
