//! External attribute connector configuration

use crate::error::Result;
use crate::types::ZoneId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

fn default_cached_interval() -> u64 {
    600
}

/// One external adapter endpoint with its OAuth client credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterEndpoint {
    /// Attribute endpoint queried with `?id=<identifier>`
    pub url: String,

    /// OAuth token endpoint for the client-credentials grant
    pub token_url: String,

    /// OAuth client id
    pub client_id: String,

    /// OAuth client secret
    pub client_secret: String,
}

/// Connector wiring for one zone and entity role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Whether the connector participates in attribute resolution
    #[serde(default)]
    pub is_active: bool,

    /// How long attributes fetched through this connector may be cached
    #[serde(default = "default_cached_interval")]
    pub max_cached_interval_seconds: u64,

    /// Adapters queried in order, attributes unioned
    #[serde(default)]
    pub adapters: Vec<AdapterEndpoint>,
}

impl ConnectorConfig {
    /// Create an active connector with no adapters
    pub fn new() -> Self {
        Self {
            is_active: true,
            max_cached_interval_seconds: default_cached_interval(),
            adapters: Vec::new(),
        }
    }

    /// Add an adapter endpoint
    pub fn with_adapter(mut self, adapter: AdapterEndpoint) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Override the attribute caching interval
    pub fn with_cached_interval_seconds(mut self, seconds: u64) -> Self {
        self.max_cached_interval_seconds = seconds;
        self
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-zone connector lookup consumed by the attribute readers
#[async_trait]
pub trait ConnectorRegistry: Send + Sync {
    /// Connector for subject attributes, if configured
    async fn subject_connector(&self, zone: &str) -> Result<Option<ConnectorConfig>>;

    /// Connector for resource attributes, if configured
    async fn resource_connector(&self, zone: &str) -> Result<Option<ConnectorConfig>>;
}

/// In-memory connector registry implementation
#[derive(Default)]
pub struct InMemoryConnectorRegistry {
    subject: RwLock<HashMap<ZoneId, ConnectorConfig>>,
    resource: RwLock<HashMap<ZoneId, ConnectorConfig>>,
}

impl InMemoryConnectorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the subject connector for a zone
    pub async fn set_subject_connector(&self, zone: &str, config: ConnectorConfig) {
        self.subject.write().await.insert(zone.to_string(), config);
    }

    /// Set the resource connector for a zone
    pub async fn set_resource_connector(&self, zone: &str, config: ConnectorConfig) {
        self.resource.write().await.insert(zone.to_string(), config);
    }
}

#[async_trait]
impl ConnectorRegistry for InMemoryConnectorRegistry {
    async fn subject_connector(&self, zone: &str) -> Result<Option<ConnectorConfig>> {
        Ok(self.subject.read().await.get(zone).cloned())
    }

    async fn resource_connector(&self, zone: &str) -> Result<Option<ConnectorConfig>> {
        Ok(self.resource.read().await.get(zone).cloned())
    }
}

// Arc so builders can hand one registry to both readers
pub type SharedConnectorRegistry = Arc<dyn ConnectorRegistry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: ConnectorConfig = serde_json::from_str("{}").unwrap();
        assert!(!config.is_active);
        assert_eq!(config.max_cached_interval_seconds, 600);
        assert!(config.adapters.is_empty());
    }

    #[tokio::test]
    async fn test_registry_roles_independent() {
        let registry = InMemoryConnectorRegistry::new();
        registry
            .set_subject_connector("acme", ConnectorConfig::new())
            .await;

        assert!(registry.subject_connector("acme").await.unwrap().is_some());
        assert!(registry.resource_connector("acme").await.unwrap().is_none());
        assert!(registry.subject_connector("umbrella").await.unwrap().is_none());
    }
}
