//! Attribute and decision caching
//!
//! Both caches come in three flavors: a no-op implementation, an in-process
//! cache with passive TTL expiration, and a distributed cache that degrades
//! to a miss when its backend is unreachable.

pub mod attribute;
pub mod backend;
pub mod decision;

pub use attribute::{
    AttributeCache, DistributedAttributeCache, InMemoryAttributeCache, NoOpAttributeCache,
};
pub use backend::{BackendError, CacheBackend, InMemoryBackend};
#[cfg(feature = "redis-cache")]
pub use backend::RedisBackend;
pub use decision::{
    DecisionCache, DecisionCacheKey, DistributedDecisionCache, InMemoryDecisionCache,
    NoOpDecisionCache,
};

use std::time::Duration;

/// TTL for distributed invalidation marks; must outlive any cached entry
pub(crate) const MARK_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache
    pub capacity: usize,

    /// Time-to-live for cached entries
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(60),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub expirations: usize,
    pub entries: usize,
    pub max_entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
