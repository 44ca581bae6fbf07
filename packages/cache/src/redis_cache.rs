//! Redis-backed distributed cache.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands as _;
use redis::aio::ConnectionManager;

use crate::{CacheError, RemoteCache};

/// Redis cache using a multiplexed, auto-reconnecting connection.
///
/// Errors are returned to the caller; bounding and fallback are the job of
/// [`crate::TieredCache`].
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    /// Connects to the Redis server at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the URL is invalid or the
    /// server cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl RemoteCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let millis = ttl
            .and_then(|ttl| u64::try_from(ttl.as_millis()).ok())
            .filter(|ms| *ms > 0);

        match millis {
            Some(ms) => conn.pset_ex::<_, _, ()>(key, value, ms).await?,
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }
}
