//! Attribute cache implementations
//!
//! Keys are namespaced by zone and entity role so a subject and a resource
//! sharing an identifier never collide. The engine recovers every cache
//! failure as a miss.

use crate::cache::backend::CacheBackend;
use crate::cache::{CacheConfig, CacheStats, MARK_TTL};
use crate::types::{epoch_millis, AttributeSet, CachedAttributes, EntityRole};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Cache for resolved attribute sets
#[async_trait]
pub trait AttributeCache: Send + Sync {
    /// Look up cached attributes for an entity
    async fn get(&self, zone: &str, role: EntityRole, identifier: &str) -> Option<AttributeSet>;

    /// Store resolved attributes for an entity
    ///
    /// `ttl` overrides the cache's default time-to-live when present.
    async fn set(
        &self,
        zone: &str,
        role: EntityRole,
        identifier: &str,
        attributes: &AttributeSet,
        ttl: Option<Duration>,
    );

    /// Drop every cached entry
    async fn flush_all(&self);

    /// Drop every cached entry belonging to a zone
    async fn flush_zone(&self, zone: &str);
}

/// Cache key namespaced by zone and role
pub(crate) fn cache_key(zone: &str, role: EntityRole, identifier: &str) -> String {
    format!("{}:{}:{}", zone, role.as_str(), identifier)
}

/// Cache that stores nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpAttributeCache;

#[async_trait]
impl AttributeCache for NoOpAttributeCache {
    async fn get(&self, _zone: &str, _role: EntityRole, _identifier: &str) -> Option<AttributeSet> {
        None
    }

    async fn set(
        &self,
        _zone: &str,
        _role: EntityRole,
        _identifier: &str,
        _attributes: &AttributeSet,
        _ttl: Option<Duration>,
    ) {
    }

    async fn flush_all(&self) {}

    async fn flush_zone(&self, _zone: &str) {}
}

/// Cached entry with its effective TTL
#[derive(Clone)]
struct CachedEntry {
    attributes: AttributeSet,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedEntry {
    fn new(attributes: AttributeSet, ttl: Duration) -> Self {
        Self {
            attributes,
            cached_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// In-process attribute cache with passive TTL expiration
pub struct InMemoryAttributeCache {
    entries: Arc<DashMap<String, CachedEntry>>,
    config: CacheConfig,
    stats: Arc<DashMap<String, usize>>,
}

impl InMemoryAttributeCache {
    /// Create a cache with the given configuration
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            config,
            stats: Arc::new(DashMap::new()),
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.get_stat("hits"),
            misses: self.get_stat("misses"),
            expirations: self.get_stat("expirations"),
            entries: self.entries.len(),
            max_entries: self.config.capacity,
        }
    }

    /// Evict oldest entries (simple approximation)
    fn evict_oldest(&self) {
        // Remove up to 10% of entries
        let to_remove = self.config.capacity / 10;
        let mut removed = 0;

        self.entries.retain(|_, _| {
            if removed < to_remove {
                removed += 1;
                false
            } else {
                true
            }
        });
    }

    fn increment_stat(&self, key: &str) {
        self.stats
            .entry(key.to_string())
            .and_modify(|count| *count += 1)
            .or_insert(1);
    }

    fn get_stat(&self, key: &str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

impl Default for InMemoryAttributeCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[async_trait]
impl AttributeCache for InMemoryAttributeCache {
    async fn get(&self, zone: &str, role: EntityRole, identifier: &str) -> Option<AttributeSet> {
        let key = cache_key(zone, role, identifier);

        if let Some(entry) = self.entries.get(&key) {
            if entry.is_expired() {
                drop(entry);
                self.entries.remove(&key);
                self.increment_stat("expirations");
                return None;
            }

            self.increment_stat("hits");
            return Some(entry.attributes.clone());
        }

        self.increment_stat("misses");
        None
    }

    async fn set(
        &self,
        zone: &str,
        role: EntityRole,
        identifier: &str,
        attributes: &AttributeSet,
        ttl: Option<Duration>,
    ) {
        if self.entries.len() >= self.config.capacity {
            self.evict_oldest();
        }

        let key = cache_key(zone, role, identifier);
        let ttl = ttl.unwrap_or(self.config.ttl);
        self.entries.insert(key, CachedEntry::new(attributes.clone(), ttl));
    }

    async fn flush_all(&self) {
        self.entries.clear();
        debug!("Attribute cache flushed");
    }

    async fn flush_zone(&self, zone: &str) {
        let prefix = format!("{}:", zone);
        self.entries.retain(|key, _| !key.starts_with(&prefix));
        debug!("Attribute cache flushed for zone '{}'", zone);
    }
}

/// Distributed attribute cache over a shared backend
///
/// Entries carry their write timestamp; zone flushes write a mark that
/// invalidates any entry cached before it. Backend failures degrade to a
/// miss so the shared store is never on the decision path.
pub struct DistributedAttributeCache {
    backend: Arc<dyn CacheBackend>,
    default_ttl: Duration,
}

impl DistributedAttributeCache {
    /// Create a cache over a backend with a default entry TTL
    pub fn new(backend: Arc<dyn CacheBackend>, default_ttl: Duration) -> Self {
        Self {
            backend,
            default_ttl,
        }
    }

    fn entry_key(zone: &str, role: EntityRole, identifier: &str) -> String {
        format!("attributes:{}", cache_key(zone, role, identifier))
    }

    fn zone_flush_key(zone: &str) -> String {
        format!("attributes:flush:{}", zone)
    }

    const GLOBAL_FLUSH_KEY: &'static str = "attributes:flush-all";

    /// Millisecond timestamp of a flush mark, if one exists
    async fn flush_mark(&self, key: &str) -> Result<Option<u64>, ()> {
        match self.backend.get(key).await {
            Ok(Some(raw)) => match raw.parse::<u64>() {
                Ok(millis) => Ok(Some(millis)),
                Err(_) => {
                    warn!("Unparseable flush mark at '{}', treating cache as flushed", key);
                    Err(())
                }
            },
            Ok(None) => Ok(None),
            Err(e) => {
                warn!("Failed to read flush mark '{}': {}", key, e);
                Err(())
            }
        }
    }

    async fn write_mark(&self, key: &str) {
        let now = epoch_millis().to_string();
        if let Err(e) = self.backend.set(key, &now, MARK_TTL).await {
            warn!("Failed to write flush mark '{}': {}", key, e);
        }
    }
}

#[async_trait]
impl AttributeCache for DistributedAttributeCache {
    async fn get(&self, zone: &str, role: EntityRole, identifier: &str) -> Option<AttributeSet> {
        let key = Self::entry_key(zone, role, identifier);

        let raw = match self.backend.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Attribute cache read failed, treating as miss: {}", e);
                return None;
            }
        };

        let cached: CachedAttributes = match serde_json::from_str(&raw) {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Corrupt attribute cache entry '{}', dropping: {}", key, e);
                let _ = self.backend.delete(&key).await;
                return None;
            }
        };

        // A flush mark at or after the write time invalidates the entry.
        // Mark lookup failures miss conservatively.
        for mark_key in [Self::zone_flush_key(zone), Self::GLOBAL_FLUSH_KEY.to_string()] {
            match self.flush_mark(&mark_key).await {
                Ok(Some(mark)) if mark >= cached.cached_at => {
                    let _ = self.backend.delete(&key).await;
                    return None;
                }
                Ok(_) => {}
                Err(()) => return None,
            }
        }

        Some(cached.attributes)
    }

    async fn set(
        &self,
        zone: &str,
        role: EntityRole,
        identifier: &str,
        attributes: &AttributeSet,
        ttl: Option<Duration>,
    ) {
        let key = Self::entry_key(zone, role, identifier);
        let cached = CachedAttributes::new(attributes.clone());

        let raw = match serde_json::to_string(&cached) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to serialize attribute cache entry: {}", e);
                return;
            }
        };

        let ttl = ttl.unwrap_or(self.default_ttl);
        if let Err(e) = self.backend.set(&key, &raw, ttl).await {
            warn!("Attribute cache write failed: {}", e);
        }
    }

    async fn flush_all(&self) {
        self.write_mark(Self::GLOBAL_FLUSH_KEY).await;
    }

    async fn flush_zone(&self, zone: &str) {
        self.write_mark(&Self::zone_flush_key(zone)).await;
    }
}
