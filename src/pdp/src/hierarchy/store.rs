//! Entity storage for the attribute hierarchy

use crate::error::Result;
use crate::types::{AttributeSet, EntityId, EntityRole, ZoneId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Edge from an entity to a parent it inherits attributes from
///
/// An empty scope means the edge always applies. A non-empty scope gates
/// the edge on attributes already established for the child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentEdge {
    /// Identifier of the parent entity
    pub identifier: EntityId,

    /// Attributes that must already hold for this edge to apply
    #[serde(default)]
    pub scope: AttributeSet,
}

impl ParentEdge {
    /// Create an unscoped parent edge
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            scope: AttributeSet::new(),
        }
    }

    /// Add a scoping attribute to the edge
    pub fn with_scope(mut self, attribute: crate::types::Attribute) -> Self {
        self.scope.insert(attribute);
        self
    }
}

/// Entity with its own attributes and parent edges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Entity identifier (URI for resources, opaque id for subjects)
    pub identifier: EntityId,

    /// Attributes asserted directly on the entity
    #[serde(default)]
    pub attributes: AttributeSet,

    /// Parents this entity inherits from
    #[serde(default)]
    pub parents: Vec<ParentEdge>,
}

impl Entity {
    /// Create an entity with no attributes or parents
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            attributes: AttributeSet::new(),
            parents: Vec::new(),
        }
    }

    /// Add an attribute asserted directly on the entity
    pub fn with_attribute(mut self, attribute: crate::types::Attribute) -> Self {
        self.attributes.insert(attribute);
        self
    }

    /// Add a parent edge
    pub fn with_parent(mut self, parent: ParentEdge) -> Self {
        self.parents.push(parent);
        self
    }
}

/// Entity storage consumed by the hierarchy resolver
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetch an entity by zone, role, and identifier
    async fn get(&self, zone: &str, role: EntityRole, identifier: &str)
        -> Result<Option<Entity>>;

    /// All entities for a zone and role
    async fn list(&self, zone: &str, role: EntityRole) -> Result<Vec<Entity>>;
}

/// In-memory entity store implementation
pub struct InMemoryEntityStore {
    entities: Arc<RwLock<HashMap<(ZoneId, EntityRole), HashMap<EntityId, Entity>>>>,
}

impl InMemoryEntityStore {
    /// Create a new in-memory entity store
    pub fn new() -> Self {
        Self {
            entities: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert or replace an entity
    pub async fn put(&self, zone: &str, role: EntityRole, entity: Entity) {
        let mut entities = self.entities.write().await;
        entities
            .entry((zone.to_string(), role))
            .or_default()
            .insert(entity.identifier.clone(), entity);
    }

    /// Remove an entity, returning whether it existed
    pub async fn delete(&self, zone: &str, role: EntityRole, identifier: &str) -> bool {
        let mut entities = self.entities.write().await;
        entities
            .get_mut(&(zone.to_string(), role))
            .map(|zone_entities| zone_entities.remove(identifier).is_some())
            .unwrap_or(false)
    }
}

impl Default for InMemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn get(
        &self,
        zone: &str,
        role: EntityRole,
        identifier: &str,
    ) -> Result<Option<Entity>> {
        let entities = self.entities.read().await;
        Ok(entities
            .get(&(zone.to_string(), role))
            .and_then(|zone_entities| zone_entities.get(identifier))
            .cloned())
    }

    async fn list(&self, zone: &str, role: EntityRole) -> Result<Vec<Entity>> {
        let entities = self.entities.read().await;
        Ok(entities
            .get(&(zone.to_string(), role))
            .map(|zone_entities| zone_entities.values().cloned().collect())
            .unwrap_or_default())
    }
}
