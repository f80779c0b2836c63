//! Key-value backends for the distributed caches
//!
//! Distributed caches talk to a shared store through [`CacheBackend`].
//! Backend failures are surfaced as [`BackendError`] and treated by callers
//! as cache misses, never as decision failures.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Error raised by a cache backend
#[derive(Debug, Error)]
#[error("Cache backend error: {0}")]
pub struct BackendError(pub String);

/// Shared key-value store with per-entry expiry
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a value
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Store a value with a time-to-live
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BackendError>;

    /// Remove a value
    async fn delete(&self, key: &str) -> Result<(), BackendError>;
}

/// In-process backend used in tests and single-node deployments
#[derive(Default)]
pub struct InMemoryBackend {
    entries: dashmap::DashMap<String, (String, Instant, Duration)>,
}

impl InMemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        if let Some(entry) = self.entries.get(key) {
            let (value, stored_at, ttl) = entry.value();
            if stored_at.elapsed() > *ttl {
                drop(entry);
                self.entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BackendError> {
        self.entries
            .insert(key.to_string(), (value.to_string(), Instant::now(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Redis-backed implementation for multi-node deployments
#[cfg(feature = "redis-cache")]
pub struct RedisBackend {
    client: redis::Client,
}

#[cfg(feature = "redis-cache")]
impl RedisBackend {
    /// Create a backend from a Redis connection URL
    ///
    /// # Errors
    /// Returns an error if the URL cannot be parsed
    pub fn new(url: &str) -> Result<Self, BackendError> {
        let client = redis::Client::open(url)
            .map_err(|e| BackendError(format!("Invalid Redis URL: {}", e)))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, BackendError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BackendError(format!("Redis connection failed: {}", e)))
    }
}

#[cfg(feature = "redis-cache")]
#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        use redis::AsyncCommands;

        let mut conn = self.connection().await?;
        conn.get(key)
            .await
            .map_err(|e| BackendError(format!("Redis GET failed: {}", e)))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BackendError> {
        use redis::AsyncCommands;

        let mut conn = self.connection().await?;
        conn.set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| BackendError(format!("Redis SETEX failed: {}", e)))
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        use redis::AsyncCommands;

        let mut conn = self.connection().await?;
        conn.del(key)
            .await
            .map_err(|e| BackendError(format!("Redis DEL failed: {}", e)))
    }
}
