//! Per-key token-bucket rate limiting.
//!
//! A [`LimiterRegistry`] owns a concurrency-safe map of key (client address
//! or authenticated identity) to bucket. Registries are constructed once at
//! process start and handed to request handlers; the map is bounded, with
//! idle buckets evicted first and the least recently used dropped when the
//! bound is reached.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Buckets idle this long are eligible for eviction.
const IDLE_EVICTION: Duration = Duration::from_secs(10 * 60);

/// Rate, burst, and bound for one registry.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Tokens refilled per second.
    pub rate_per_sec: f64,
    /// Bucket capacity; also the initial fill.
    pub burst: u32,
    /// Hard cap on tracked keys; eviction keeps the map at or under this.
    pub max_entries: usize,
}

impl LimiterConfig {
    /// Default for unauthenticated endpoints, keyed by client address:
    /// 5 per minute with a burst of 5.
    pub fn per_address() -> Self {
        Self {
            rate_per_sec: 5.0 / 60.0,
            burst: 5,
            max_entries: 10_000,
        }
    }

    /// Default for authenticated endpoints, keyed by identity:
    /// 1 per second with a burst of 5.
    pub fn per_identity() -> Self {
        Self {
            rate_per_sec: 1.0,
            burst: 5,
            max_entries: 10_000,
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Shared map of key to token bucket. Safe for unbounded concurrent access;
/// every operation takes at most one shard lock.
pub struct LimiterRegistry {
    buckets: DashMap<String, Bucket>,
    config: LimiterConfig,
}

impl LimiterRegistry {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
        }
    }

    /// Take one token for `key` if available. A rejected call consumes
    /// nothing, so a throttled client does not push its own window out.
    pub fn allow(&self, key: &str) -> bool {
        if self.buckets.len() >= self.config.max_entries {
            self.evict(key);
        }

        let mut entry = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket {
                tokens: self.config.burst as f64,
                last_refill: Instant::now(),
            });

        let bucket = entry.value_mut();
        let elapsed = bucket.last_refill.elapsed().as_secs_f64();
        bucket.tokens =
            (bucket.tokens + elapsed * self.config.rate_per_sec).min(self.config.burst as f64);
        bucket.last_refill = Instant::now();

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Current number of tracked keys.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drop idle buckets, then enforce the bound: if a burst of fresh keys
    /// filled the map inside the idle window, the least recently refilled
    /// entries go too, leaving room for the insert that triggered eviction.
    fn evict(&self, incoming: &str) {
        self.buckets
            .retain(|_, bucket| bucket.last_refill.elapsed() < IDLE_EVICTION);

        let target = self.config.max_entries.saturating_sub(1);
        let excess = self.buckets.len().saturating_sub(target);
        if excess == 0 {
            return;
        }
        let mut by_age: Vec<(String, Instant)> = self
            .buckets
            .iter()
            .filter(|entry| entry.key() != incoming)
            .map(|entry| (entry.key().clone(), entry.value().last_refill))
            .collect();
        by_age.sort_by_key(|(_, refilled)| *refilled);
        for (key, _) in by_age.into_iter().take(excess) {
            self.buckets.remove(&key);
        }
    }
}
