//! Distributed cache with an in-process fallback tier.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::{CacheBackend, CacheError, MemoryCache, RemoteCache};

/// Uses a [`RemoteCache`] and falls back to a [`MemoryCache`] for any
/// operation that errors or exceeds `timeout`.
///
/// Failed reads are answered from the local tier, failed writes land in the
/// local tier. Neither is ever reported to the caller.
pub struct TieredCache {
    remote: Box<dyn RemoteCache>,
    local: MemoryCache,
    timeout: Duration,
}

impl TieredCache {
    /// Creates the tiered cache.
    #[must_use]
    pub fn new(remote: Box<dyn RemoteCache>, local: MemoryCache, timeout: Duration) -> Self {
        Self {
            remote,
            local,
            timeout,
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, CacheError>> + Send,
    ) -> Result<T, CacheError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| CacheError::Timeout {
                operation,
                timeout_ms: self.timeout.as_millis(),
            })?
    }
}

#[async_trait]
impl CacheBackend for TieredCache {
    async fn get(&self, key: &str) -> Option<String> {
        match self.bounded("get", self.remote.get(key)).await {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Redis cache error, falling back to memory: {e}");
                self.local.lookup(key).await
            }
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) {
        if let Err(e) = self.bounded("set", self.remote.set(key, &value, ttl)).await {
            log::warn!("Redis cache error, falling back to memory: {e}");
            self.local.insert(key, value, ttl).await;
        }
    }
}
