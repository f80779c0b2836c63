//! Decision cache implementations
//!
//! Keys fingerprint the full decision request, including which policy sets
//! were selected, with BLAKE3. Invalidation is mark-based: invalidating a
//! zone, subject, resource, or policy set records a mark, and entries
//! written before an applicable mark are treated as gone.

use crate::cache::backend::CacheBackend;
use crate::cache::{CacheConfig, CacheStats, MARK_TTL};
use crate::engine::decision::Decision;
use crate::policy::PolicySetSelection;
use crate::types::epoch_millis;
use async_trait::async_trait;
use blake3::Hasher;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Everything a decision depends on, as a cache key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionCacheKey {
    /// Zone the request was evaluated in
    pub zone: String,
    /// Subject identifier
    pub subject: String,
    /// Resource identifier
    pub resource: String,
    /// Requested action
    pub action: String,
    /// Policy sets the request was evaluated against
    pub selection: PolicySetSelection,
}

impl DecisionCacheKey {
    /// Create a key
    pub fn new(
        zone: impl Into<String>,
        subject: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
        selection: PolicySetSelection,
    ) -> Self {
        Self {
            zone: zone.into(),
            subject: subject.into(),
            resource: resource.into(),
            action: action.into(),
            selection,
        }
    }

    /// BLAKE3 fingerprint of the key
    ///
    /// Fields are separated by a NUL byte so concatenations cannot collide.
    /// The evaluate-everything selection hashes a sentinel distinct from any
    /// explicit id list, including a list containing the literal `*`.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Hasher::new();

        hasher.update(self.zone.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.subject.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.resource.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.action.as_bytes());
        hasher.update(&[0]);

        match &self.selection {
            PolicySetSelection::All => {
                hasher.update(b"*");
            }
            PolicySetSelection::Explicit(ids) => {
                for id in ids {
                    hasher.update(id.as_bytes());
                    hasher.update(&[0]);
                }
            }
        }

        *hasher.finalize().as_bytes()
    }

    /// Fingerprint as lowercase hex, for string-keyed backends
    pub fn fingerprint_hex(&self) -> String {
        blake3::Hash::from(self.fingerprint()).to_hex().to_string()
    }
}

/// Invalidation mark names applicable to a key
fn applicable_marks(key: &DecisionCacheKey) -> Vec<String> {
    let mut marks = vec![
        zone_mark(&key.zone),
        subject_mark(&key.zone, &key.subject),
        resource_mark(&key.zone, &key.resource),
    ];
    match &key.selection {
        PolicySetSelection::All => marks.push(any_policy_set_mark(&key.zone)),
        PolicySetSelection::Explicit(ids) => {
            for id in ids {
                marks.push(policy_set_mark(&key.zone, id));
            }
        }
    }
    marks
}

fn zone_mark(zone: &str) -> String {
    format!("zone:{}", zone)
}

fn subject_mark(zone: &str, subject: &str) -> String {
    format!("subject:{}:{}", zone, subject)
}

fn resource_mark(zone: &str, resource: &str) -> String {
    format!("resource:{}:{}", zone, resource)
}

fn policy_set_mark(zone: &str, id: &str) -> String {
    format!("policy-set:{}:{}", zone, id)
}

/// Rollup mark covering entries evaluated against all active policy sets
fn any_policy_set_mark(zone: &str) -> String {
    format!("policy-sets:{}", zone)
}

/// Cache for computed decisions
#[async_trait]
pub trait DecisionCache: Send + Sync {
    /// Look up a cached decision
    async fn get(&self, key: &DecisionCacheKey) -> Option<Decision>;

    /// Store a decision
    async fn set(&self, key: &DecisionCacheKey, decision: &Decision);

    /// Invalidate every entry for a zone
    async fn invalidate_zone(&self, zone: &str);

    /// Invalidate entries whose subject matches
    async fn invalidate_subject(&self, zone: &str, subject: &str);

    /// Invalidate entries whose resource matches
    async fn invalidate_resource(&self, zone: &str, resource: &str);

    /// Invalidate entries evaluated against a policy set
    ///
    /// Also covers entries evaluated against all active sets, since the
    /// named set may have been among them.
    async fn invalidate_policy_set(&self, zone: &str, id: &str);
}

/// Cache that stores nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpDecisionCache;

#[async_trait]
impl DecisionCache for NoOpDecisionCache {
    async fn get(&self, _key: &DecisionCacheKey) -> Option<Decision> {
        None
    }

    async fn set(&self, _key: &DecisionCacheKey, _decision: &Decision) {}

    async fn invalidate_zone(&self, _zone: &str) {}

    async fn invalidate_subject(&self, _zone: &str, _subject: &str) {}

    async fn invalidate_resource(&self, _zone: &str, _resource: &str) {}

    async fn invalidate_policy_set(&self, _zone: &str, _id: &str) {}
}

/// Cached entry with TTL
#[derive(Clone)]
struct CachedEntry {
    decision: Decision,
    cached_at: Instant,
}

impl CachedEntry {
    fn new(decision: Decision) -> Self {
        Self {
            decision,
            cached_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// In-process decision cache with passive TTL expiration
pub struct InMemoryDecisionCache {
    entries: Arc<DashMap<[u8; 32], CachedEntry>>,
    marks: Arc<DashMap<String, Instant>>,
    config: CacheConfig,
    stats: Arc<DashMap<String, usize>>,
}

impl InMemoryDecisionCache {
    /// Create a cache with the given configuration
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            marks: Arc::new(DashMap::new()),
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

    fn is_invalidated(&self, key: &DecisionCacheKey, cached_at: Instant) -> bool {
        applicable_marks(key).iter().any(|mark| {
            self.marks
                .get(mark)
                .map(|marked_at| *marked_at >= cached_at)
                .unwrap_or(false)
        })
    }

    fn mark(&self, name: String) {
        self.marks.insert(name, Instant::now());
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

impl Default for InMemoryDecisionCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[async_trait]
impl DecisionCache for InMemoryDecisionCache {
    async fn get(&self, key: &DecisionCacheKey) -> Option<Decision> {
        let fingerprint = key.fingerprint();

        if let Some(entry) = self.entries.get(&fingerprint) {
            if entry.is_expired(self.config.ttl) {
                drop(entry);
                self.entries.remove(&fingerprint);
                self.increment_stat("expirations");
                return None;
            }

            if self.is_invalidated(key, entry.cached_at) {
                drop(entry);
                self.entries.remove(&fingerprint);
                self.increment_stat("invalidations");
                return None;
            }

            self.increment_stat("hits");
            return Some(entry.decision.clone());
        }

        self.increment_stat("misses");
        None
    }

    async fn set(&self, key: &DecisionCacheKey, decision: &Decision) {
        if self.entries.len() >= self.config.capacity {
            self.evict_oldest();
        }

        self.entries
            .insert(key.fingerprint(), CachedEntry::new(decision.clone()));
    }

    async fn invalidate_zone(&self, zone: &str) {
        self.mark(zone_mark(zone));
        debug!("Decision cache invalidated for zone '{}'", zone);
    }

    async fn invalidate_subject(&self, zone: &str, subject: &str) {
        self.mark(subject_mark(zone, subject));
    }

    async fn invalidate_resource(&self, zone: &str, resource: &str) {
        self.mark(resource_mark(zone, resource));
    }

    async fn invalidate_policy_set(&self, zone: &str, id: &str) {
        self.mark(policy_set_mark(zone, id));
        self.mark(any_policy_set_mark(zone));
    }
}

/// Decision with its write timestamp, as stored in a shared backend
#[derive(Serialize, Deserialize)]
struct StoredDecision {
    decision: Decision,
    cached_at: u64,
}

/// Distributed decision cache over a shared backend
///
/// Backend failures degrade to a miss on reads and are ignored on writes.
/// Mark lookups that fail also miss, so an unreachable backend can never
/// serve a decision that might have been invalidated.
pub struct DistributedDecisionCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl DistributedDecisionCache {
    /// Create a cache over a backend with an entry TTL
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    fn entry_key(key: &DecisionCacheKey) -> String {
        format!("decision:{}", key.fingerprint_hex())
    }

    fn mark_key(mark: &str) -> String {
        format!("decision:mark:{}", mark)
    }

    async fn write_mark(&self, mark: String) {
        let now = epoch_millis().to_string();
        if let Err(e) = self.backend.set(&Self::mark_key(&mark), &now, MARK_TTL).await {
            warn!("Failed to write decision cache mark '{}': {}", mark, e);
        }
    }
}

#[async_trait]
impl DecisionCache for DistributedDecisionCache {
    async fn get(&self, key: &DecisionCacheKey) -> Option<Decision> {
        let entry_key = Self::entry_key(key);

        let raw = match self.backend.get(&entry_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Decision cache read failed, treating as miss: {}", e);
                return None;
            }
        };

        let stored: StoredDecision = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Corrupt decision cache entry '{}', dropping: {}", entry_key, e);
                let _ = self.backend.delete(&entry_key).await;
                return None;
            }
        };

        for mark in applicable_marks(key) {
            match self.backend.get(&Self::mark_key(&mark)).await {
                Ok(Some(raw_mark)) => match raw_mark.parse::<u64>() {
                    Ok(marked_at) if marked_at >= stored.cached_at => {
                        let _ = self.backend.delete(&entry_key).await;
                        return None;
                    }
                    Ok(_) => {}
                    Err(_) => {
                        warn!("Unparseable decision cache mark '{}'", mark);
                        return None;
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    warn!("Decision cache mark read failed, treating as miss: {}", e);
                    return None;
                }
            }
        }

        Some(stored.decision)
    }

    async fn set(&self, key: &DecisionCacheKey, decision: &Decision) {
        let stored = StoredDecision {
            decision: decision.clone(),
            cached_at: epoch_millis(),
        };

        let raw = match serde_json::to_string(&stored) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to serialize decision cache entry: {}", e);
                return;
            }
        };

        if let Err(e) = self.backend.set(&Self::entry_key(key), &raw, self.ttl).await {
            warn!("Decision cache write failed: {}", e);
        }
    }

    async fn invalidate_zone(&self, zone: &str) {
        self.write_mark(zone_mark(zone)).await;
    }

    async fn invalidate_subject(&self, zone: &str, subject: &str) {
        self.write_mark(subject_mark(zone, subject)).await;
    }

    async fn invalidate_resource(&self, zone: &str, resource: &str) {
        self.write_mark(resource_mark(zone, resource)).await;
    }

    async fn invalidate_policy_set(&self, zone: &str, id: &str) {
        self.write_mark(policy_set_mark(zone, id)).await;
        self.write_mark(any_policy_set_mark(zone)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::{BackendError, InMemoryBackend};

    fn sample_key(selection: PolicySetSelection) -> DecisionCacheKey {
        DecisionCacheKey::new("acme", "agent_mulder", "site/boston", "GET", selection)
    }

    fn sample_decision() -> Decision {
        Decision::permit("allow-read", "matched", vec![])
    }

    #[test]
    fn test_fingerprint_stable_and_sensitive() {
        let key = sample_key(PolicySetSelection::All);
        assert_eq!(key.fingerprint(), key.fingerprint());

        let other_zone =
            DecisionCacheKey::new("umbrella", "agent_mulder", "site/boston", "GET", PolicySetSelection::All);
        assert_ne!(key.fingerprint(), other_zone.fingerprint());

        let other_action =
            DecisionCacheKey::new("acme", "agent_mulder", "site/boston", "DELETE", PolicySetSelection::All);
        assert_ne!(key.fingerprint(), other_action.fingerprint());
    }

    #[test]
    fn test_fingerprint_wildcard_distinct_from_literal_star() {
        let wildcard = sample_key(PolicySetSelection::All);
        let literal = sample_key(PolicySetSelection::Explicit(vec!["*".to_string()]));
        assert_ne!(wildcard.fingerprint(), literal.fingerprint());
    }

    #[test]
    fn test_fingerprint_selection_order_matters() {
        let ab = sample_key(PolicySetSelection::Explicit(vec![
            "a".to_string(),
            "b".to_string(),
        ]));
        let ba = sample_key(PolicySetSelection::Explicit(vec![
            "b".to_string(),
            "a".to_string(),
        ]));
        assert_ne!(ab.fingerprint(), ba.fingerprint());
    }

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let cache = InMemoryDecisionCache::default();
        let key = sample_key(PolicySetSelection::All);

        assert!(cache.get(&key).await.is_none());
        cache.set(&key, &sample_decision()).await;

        let cached = cache.get(&key).await;
        assert!(cached.is_some());
        assert!(cached.unwrap().is_permit());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_in_memory_ttl() {
        let cache = InMemoryDecisionCache::new(CacheConfig {
            ttl: Duration::from_millis(20),
            ..Default::default()
        });
        let key = sample_key(PolicySetSelection::All);

        cache.set(&key, &sample_decision()).await;
        assert!(cache.get(&key).await.is_some());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_zone() {
        let cache = InMemoryDecisionCache::default();
        let key = sample_key(PolicySetSelection::All);
        let other_zone =
            DecisionCacheKey::new("umbrella", "s", "r", "GET", PolicySetSelection::All);

        cache.set(&key, &sample_decision()).await;
        cache.set(&other_zone, &sample_decision()).await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.invalidate_zone("acme").await;

        assert!(cache.get(&key).await.is_none());
        assert!(cache.get(&other_zone).await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_subject() {
        let cache = InMemoryDecisionCache::default();
        let key = sample_key(PolicySetSelection::All);
        let other = DecisionCacheKey::new(
            "acme",
            "agent_scully",
            "site/boston",
            "GET",
            PolicySetSelection::All,
        );

        cache.set(&key, &sample_decision()).await;
        cache.set(&other, &sample_decision()).await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.invalidate_subject("acme", "agent_mulder").await;

        assert!(cache.get(&key).await.is_none());
        assert!(cache.get(&other).await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_policy_set_covers_wildcard_entries() {
        let cache = InMemoryDecisionCache::default();
        let wildcard = sample_key(PolicySetSelection::All);
        let explicit = sample_key(PolicySetSelection::Explicit(vec!["default".to_string()]));
        let unrelated = sample_key(PolicySetSelection::Explicit(vec!["other".to_string()]));

        cache.set(&wildcard, &sample_decision()).await;
        cache.set(&explicit, &sample_decision()).await;
        cache.set(&unrelated, &sample_decision()).await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.invalidate_policy_set("acme", "default").await;

        assert!(cache.get(&wildcard).await.is_none());
        assert!(cache.get(&explicit).await.is_none());
        assert!(cache.get(&unrelated).await.is_some());
    }

    #[tokio::test]
    async fn test_entries_written_after_invalidation_survive() {
        let cache = InMemoryDecisionCache::default();
        let key = sample_key(PolicySetSelection::All);

        cache.invalidate_zone("acme").await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        cache.set(&key, &sample_decision()).await;
        assert!(cache.get(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_distributed_roundtrip_and_invalidation() {
        let backend = Arc::new(InMemoryBackend::new());
        let cache = DistributedDecisionCache::new(backend, Duration::from_secs(60));
        let key = sample_key(PolicySetSelection::All);

        cache.set(&key, &sample_decision()).await;
        assert!(cache.get(&key).await.is_some());

        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.invalidate_resource("acme", "site/boston").await;
        assert!(cache.get(&key).await.is_none());
    }

    struct FailingBackend;

    #[async_trait]
    impl CacheBackend for FailingBackend {
        async fn get(&self, _key: &str) -> Result<Option<String>, BackendError> {
            Err(BackendError("connection refused".to_string()))
        }

        async fn set(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Duration,
        ) -> Result<(), BackendError> {
            Err(BackendError("connection refused".to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<(), BackendError> {
            Err(BackendError("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_distributed_degrades_to_miss() {
        let cache = DistributedDecisionCache::new(Arc::new(FailingBackend), Duration::from_secs(60));
        let key = sample_key(PolicySetSelection::All);

        cache.set(&key, &sample_decision()).await;
        assert!(cache.get(&key).await.is_none());
    }
}
