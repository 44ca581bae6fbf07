#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Short-TTL payload cache for the GIS query engine.
//!
//! All consumers talk to a single [`CacheBackend`] contract. Which
//! implementation sits behind it is decided once, by [`build_backend`]:
//!
//! * no `REDIS_URL` configured: an in-process [`MemoryCache`]
//! * `REDIS_URL` configured and reachable: a [`TieredCache`] that uses Redis
//!   and degrades to an in-process map whenever Redis errors or times out
//!
//! Distributed cache failures are logged and absorbed here. Code above this
//! crate never observes them.

pub mod memory;
pub mod redis_cache;
pub mod tiered;

pub use memory::MemoryCache;
pub use redis_cache::RedisCache;
pub use tiered::TieredCache;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Default bound on every distributed cache operation.
pub const DEFAULT_TIMEOUT_MS: u64 = 250;

/// Default capacity of the in-process cache.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Errors raised by a distributed cache. Internal to this crate's tiers;
/// [`CacheBackend`] implementations never return them.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The distributed cache rejected the command or the connection failed.
    #[error("Distributed cache unavailable: {0}")]
    Unavailable(#[from] redis::RedisError),

    /// The distributed cache did not answer within the configured bound.
    #[error("Distributed cache {operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// `get`, `set`, or `connect`.
        operation: &'static str,
        /// The bound that was exceeded.
        timeout_ms: u128,
    },
}

/// The cache contract seen by the query engine.
///
/// Reads return `None` for absent, expired, or unreachable entries; writes
/// are best effort. A `ttl` of `None` stores without expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Looks up a value.
    async fn get(&self, key: &str) -> Option<String>;

    /// Stores a value.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>);
}

/// A distributed cache whose failures are visible to the caller.
///
/// Wrapped by [`TieredCache`], which turns every error into a fallback.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    /// Looks up a value.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] on any connection or protocol failure.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores a value. `None` stores without expiry.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] on any connection or protocol failure.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;
}

/// Converts a millisecond TTL into an expiry duration.
///
/// Zero or negative values mean "no expiry".
#[must_use]
pub fn ttl_from_millis(ms: i64) -> Option<Duration> {
    u64::try_from(ms)
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

/// Cache construction settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Redis connection string. `None` keeps everything in-process.
    pub redis_url: Option<String>,
    /// Bound applied to every distributed cache operation.
    pub timeout: Duration,
    /// Capacity of the in-process map.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl CacheConfig {
    /// Reads `REDIS_URL`, `CACHE_TIMEOUT_MS`, and `CACHE_MAX_ENTRIES` from
    /// the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            redis_url: lookup("REDIS_URL").filter(|url| !url.trim().is_empty()),
            timeout: lookup("CACHE_TIMEOUT_MS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map_or(defaults.timeout, Duration::from_millis),
            max_entries: lookup("CACHE_MAX_ENTRIES")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_entries),
        }
    }
}

/// Builds the cache backend described by `config`.
///
/// A configured Redis that cannot be reached within the timeout is logged
/// and replaced by the in-process cache.
pub async fn build_backend(config: &CacheConfig) -> Arc<dyn CacheBackend> {
    let Some(url) = config.redis_url.as_deref() else {
        log::info!("No REDIS_URL configured, using in-process cache");
        return Arc::new(MemoryCache::new(config.max_entries));
    };

    match tokio::time::timeout(config.timeout, RedisCache::connect(url)).await {
        Ok(Ok(redis)) => {
            log::info!("Using Redis cache with in-process fallback");
            Arc::new(TieredCache::new(
                Box::new(redis),
                MemoryCache::new(config.max_entries),
                config.timeout,
            ))
        }
        Ok(Err(e)) => {
            log::warn!("Failed to init Redis, using in-process cache: {e}");
            Arc::new(MemoryCache::new(config.max_entries))
        }
        Err(_) => {
            log::warn!(
                "Redis connection timed out after {}ms, using in-process cache",
                config.timeout.as_millis()
            );
            Arc::new(MemoryCache::new(config.max_entries))
        }
    }
}

/// A payload produced by [`QueryCache::get_or_compute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cached {
    /// Serialized payload.
    pub body: String,
    /// Whether the payload came from the cache.
    pub hit: bool,
}

/// Stale-within-TTL read-through cache over a [`CacheBackend`].
#[derive(Clone)]
pub struct QueryCache {
    backend: Arc<dyn CacheBackend>,
}

impl QueryCache {
    /// Wraps a backend.
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Returns the cached payload for `key`, or runs `compute`, stores its
    /// output under `ttl`, and returns it.
    ///
    /// Hits are returned unchanged with no re-validation. Errors from
    /// `compute` are returned as-is and nothing is cached.
    ///
    /// # Errors
    ///
    /// Returns whatever `compute` returns.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<Cached, E>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<String, E>> + Send,
    {
        if let Some(body) = self.backend.get(key).await {
            log::debug!("Cache hit for {key}");
            return Ok(Cached { body, hit: true });
        }

        log::debug!("Cache miss for {key}");
        let body = compute().await?;
        self.backend.set(key, body.clone(), ttl).await;

        Ok(Cached { body, hit: false })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn ttl_zero_or_negative_means_no_expiry() {
        assert_eq!(ttl_from_millis(0), None);
        assert_eq!(ttl_from_millis(-5), None);
        assert_eq!(ttl_from_millis(1500), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn config_reads_lookup_with_defaults() {
        let config = CacheConfig::from_lookup(|name| match name {
            "REDIS_URL" => Some("redis://cache:6379".to_string()),
            "CACHE_TIMEOUT_MS" => Some("75".to_string()),
            "CACHE_MAX_ENTRIES" => Some("nope".to_string()),
            _ => None,
        });

        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.timeout, Duration::from_millis(75));
        assert_eq!(config.max_entries, DEFAULT_MAX_ENTRIES);

        let empty = CacheConfig::from_lookup(|name| {
            (name == "REDIS_URL").then(|| "  ".to_string())
        });
        assert_eq!(empty, CacheConfig::default());
    }

    #[tokio::test]
    async fn without_redis_url_builds_in_process_cache() {
        let backend = build_backend(&CacheConfig::default()).await;
        backend.set("k", "v".to_string(), None).await;
        assert_eq!(backend.get("k").await.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let cache = QueryCache::new(Arc::new(MemoryCache::new(16)));
        let calls = AtomicUsize::new(0);

        let compute = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::convert::Infallible>("{\"features\":[]}".to_string())
        };

        let first = cache
            .get_or_compute("q", Some(Duration::from_secs(5)), compute)
            .await
            .unwrap();
        let second = cache
            .get_or_compute("q", Some(Duration::from_secs(5)), compute)
            .await
            .unwrap();

        assert!(!first.hit);
        assert!(second.hit);
        assert_eq!(first.body, second.body);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn compute_errors_are_not_cached() {
        let cache = QueryCache::new(Arc::new(MemoryCache::new(16)));

        let failed = cache
            .get_or_compute("q", None, || async { Err::<String, _>("boom") })
            .await;
        assert_eq!(failed.unwrap_err(), "boom");

        let recovered = cache
            .get_or_compute("q", None, || async { Ok::<_, &str>("ok".to_string()) })
            .await
            .unwrap();
        assert!(!recovered.hit);
        assert_eq!(recovered.body, "ok");
    }
}
