//! Subject and resource attribute readers
//!
//! A reader resolves the effective attributes of an entity: consult the
//! attribute cache, walk the hierarchy, union in whatever active external
//! adapters assert, then write the result back through the cache. Adapter
//! failures and oversized results are errors; a decision is never made on
//! partial attributes.

use crate::cache::AttributeCache;
use crate::connector::{AdapterClient, ConnectorConfig, ConnectorRegistry};
use crate::error::{PdpError, Result};
use crate::hierarchy::HierarchyResolver;
use crate::types::{AttributeSet, EntityRole};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Caps on a resolved attribute set
#[derive(Debug, Clone, Copy)]
pub struct AttributeLimits {
    /// Maximum number of attributes
    pub max_count: usize,

    /// Maximum serialized size in bytes
    pub max_size_bytes: usize,
}

impl Default for AttributeLimits {
    fn default() -> Self {
        Self {
            max_count: 1024,
            max_size_bytes: 256 * 1024,
        }
    }
}

/// Shared resolution pipeline behind both readers
struct ReaderCore {
    role: EntityRole,
    cache: Arc<dyn AttributeCache>,
    hierarchy: Arc<HierarchyResolver>,
    registry: Arc<dyn ConnectorRegistry>,
    client: Arc<AdapterClient>,
    limits: AttributeLimits,
}

impl ReaderCore {
    async fn get_attributes(&self, zone: &str, identifier: &str) -> Result<AttributeSet> {
        if let Some(cached) = self.cache.get(zone, self.role, identifier).await {
            debug!(
                "Attribute cache hit for {} '{}' in zone '{}'",
                self.role.as_str(),
                identifier,
                zone
            );
            return Ok(cached);
        }

        let mut resolved = self
            .hierarchy
            .resolve_attributes(zone, self.role, identifier, None)
            .await?;

        let connector = self.connector_config(zone).await?;
        if let Some(config) = connector.as_ref().filter(|c| c.is_active) {
            self.fetch_external(config, identifier, &mut resolved).await?;
        }

        self.enforce_limits(identifier, &resolved)?;

        let ttl = connector
            .filter(|c| c.is_active)
            .map(|c| Duration::from_secs(c.max_cached_interval_seconds));
        self.cache
            .set(zone, self.role, identifier, &resolved, ttl)
            .await;

        Ok(resolved)
    }

    /// Resolve with an explicit scope filter, bypassing the cache
    ///
    /// Scoped results depend on the caller's filter, so they are neither
    /// served from nor written to the shared cache.
    async fn get_attributes_by_scope(
        &self,
        zone: &str,
        identifier: &str,
        scope: &AttributeSet,
    ) -> Result<AttributeSet> {
        let mut resolved = self
            .hierarchy
            .resolve_attributes(zone, self.role, identifier, Some(scope))
            .await?;

        let connector = self.connector_config(zone).await?;
        if let Some(config) = connector.as_ref().filter(|c| c.is_active) {
            self.fetch_external(config, identifier, &mut resolved).await?;
        }

        self.enforce_limits(identifier, &resolved)?;

        Ok(resolved)
    }

    async fn fetch_external(
        &self,
        config: &ConnectorConfig,
        identifier: &str,
        resolved: &mut AttributeSet,
    ) -> Result<()> {
        for adapter in &config.adapters {
            let fetched = self.client.fetch_attributes(adapter, identifier).await?;
            resolved.extend(fetched);
        }
        Ok(())
    }

    async fn connector_config(&self, zone: &str) -> Result<Option<ConnectorConfig>> {
        match self.role {
            EntityRole::Subject => self.registry.subject_connector(zone).await,
            EntityRole::Resource => self.registry.resource_connector(zone).await,
        }
    }

    fn enforce_limits(&self, identifier: &str, attributes: &AttributeSet) -> Result<()> {
        if attributes.len() > self.limits.max_count {
            return Err(PdpError::AttributeLimitExceeded {
                identifier: identifier.to_string(),
                detail: format!(
                    "{} attributes exceeds limit of {}",
                    attributes.len(),
                    self.limits.max_count
                ),
            });
        }

        let serialized = serde_json::to_vec(attributes)
            .map_err(|e| PdpError::Internal(format!("Failed to size attribute set: {}", e)))?;
        if serialized.len() > self.limits.max_size_bytes {
            return Err(PdpError::AttributeLimitExceeded {
                identifier: identifier.to_string(),
                detail: format!(
                    "{} serialized bytes exceeds limit of {}",
                    serialized.len(),
                    self.limits.max_size_bytes
                ),
            });
        }

        Ok(())
    }
}

/// Reader for subject attributes
pub struct SubjectAttributeReader {
    core: ReaderCore,
}

impl SubjectAttributeReader {
    /// Create a subject reader
    pub fn new(
        cache: Arc<dyn AttributeCache>,
        hierarchy: Arc<HierarchyResolver>,
        registry: Arc<dyn ConnectorRegistry>,
        client: Arc<AdapterClient>,
        limits: AttributeLimits,
    ) -> Self {
        Self {
            core: ReaderCore {
                role: EntityRole::Subject,
                cache,
                hierarchy,
                registry,
                client,
                limits,
            },
        }
    }

    /// Effective attributes of a subject
    pub async fn get_attributes(&self, zone: &str, identifier: &str) -> Result<AttributeSet> {
        self.core.get_attributes(zone, identifier).await
    }

    /// Effective attributes of a subject with scoped inheritance
    pub async fn get_attributes_by_scope(
        &self,
        zone: &str,
        identifier: &str,
        scope: &AttributeSet,
    ) -> Result<AttributeSet> {
        self.core.get_attributes_by_scope(zone, identifier, scope).await
    }
}

/// Reader for resource attributes
pub struct ResourceAttributeReader {
    core: ReaderCore,
}

impl ResourceAttributeReader {
    /// Create a resource reader
    pub fn new(
        cache: Arc<dyn AttributeCache>,
        hierarchy: Arc<HierarchyResolver>,
        registry: Arc<dyn ConnectorRegistry>,
        client: Arc<AdapterClient>,
        limits: AttributeLimits,
    ) -> Self {
        Self {
            core: ReaderCore {
                role: EntityRole::Resource,
                cache,
                hierarchy,
                registry,
                client,
                limits,
            },
        }
    }

    /// Effective attributes of a resource
    pub async fn get_attributes(&self, zone: &str, identifier: &str) -> Result<AttributeSet> {
        self.core.get_attributes(zone, identifier).await
    }
}
