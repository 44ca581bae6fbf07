//! In-process TTL cache.
//!
//! Backed by a [`moka`] future cache bounded by entry count. Each entry
//! carries its own TTL, so incident and overlay payloads can share one map
//! with different lifetimes. Expired entries are never returned.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;

use crate::CacheBackend;

#[derive(Clone)]
struct Entry {
    value: String,
    ttl: Option<Duration>,
}

/// Expires every entry after the TTL it was written with. `None` never
/// expires. Reads do not extend the lifetime.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        entry.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        entry.ttl
    }
}

/// Thread-safe in-process cache.
#[derive(Clone)]
pub struct MemoryCache {
    entries: Cache<String, Entry>,
}

impl MemoryCache {
    /// Creates an empty cache holding at most `max_entries` values.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        let capacity = u64::try_from(max_entries.max(1)).unwrap_or(u64::MAX);
        log::debug!("In-process cache initialized with capacity={capacity}");

        Self {
            entries: Cache::builder()
                .max_capacity(capacity)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }

    /// Returns the live value for `key`.
    pub async fn lookup(&self, key: &str) -> Option<String> {
        self.entries.get(key).await.map(|entry| entry.value)
    }

    /// Stores `value` under `key`. `None` never expires.
    pub async fn insert(&self, key: &str, value: String, ttl: Option<Duration>) {
        self.entries
            .insert(key.to_string(), Entry { value, ttl })
            .await;
    }

    /// Number of live entries after pending evictions have been applied.
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    /// Whether the cache holds no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        self.lookup(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) {
        self.insert(key, value, ttl).await;
    }
}
