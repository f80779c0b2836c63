//! Attribute resolution over the entity hierarchy
//!
//! Entities inherit attributes from their parents. The graph is expected to
//! be acyclic; traversal keeps a visited set so shared ancestors contribute
//! once, and an on-path set so a cycle degrades to a logged warning instead
//! of an infinite walk.

use crate::error::Result;
use crate::hierarchy::store::{EntityStore, ParentEdge};
use crate::types::{AttributeSet, EntityId, EntityRole};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Resolves the effective attribute set of an entity
pub struct HierarchyResolver {
    store: Arc<dyn EntityStore>,
}

/// Traversal frame: one entity and a cursor over its parent edges
struct Frame {
    identifier: EntityId,
    parents: Vec<ParentEdge>,
    next: usize,
}

impl HierarchyResolver {
    /// Create a resolver over an entity store
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Resolve the effective attributes of an entity
    ///
    /// Walks parent edges depth-first in authored order, unioning each
    /// entity's own attributes. A scoped edge is followed only when every
    /// attribute in its scope is already established, either by attributes
    /// accumulated so far or by the caller-supplied `scope` filter.
    ///
    /// # Arguments
    /// * `zone` - Zone the entity belongs to
    /// * `role` - Whether the entity is a subject or a resource
    /// * `identifier` - Entity identifier
    /// * `scope` - Optional attributes treated as pre-established for edge gating
    ///
    /// # Returns
    /// The unioned attribute set; empty if the entity is unknown
    pub async fn resolve_attributes(
        &self,
        zone: &str,
        role: EntityRole,
        identifier: &str,
        scope: Option<&AttributeSet>,
    ) -> Result<AttributeSet> {
        let Some(root) = self.store.get(zone, role, identifier).await? else {
            debug!("No {} entity '{}' in zone '{}'", role.as_str(), identifier, zone);
            return Ok(AttributeSet::new());
        };

        let mut resolved = root.attributes.clone();
        let mut on_path: HashSet<EntityId> = HashSet::new();
        let mut done: HashSet<EntityId> = HashSet::new();

        on_path.insert(root.identifier.clone());
        let mut stack = vec![Frame {
            identifier: root.identifier,
            parents: root.parents,
            next: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            let next_edge = if frame.next < frame.parents.len() {
                let edge = frame.parents[frame.next].clone();
                frame.next += 1;
                Some(edge)
            } else {
                None
            };

            let Some(edge) = next_edge else {
                if let Some(finished) = stack.pop() {
                    on_path.remove(&finished.identifier);
                    done.insert(finished.identifier);
                }
                continue;
            };

            if on_path.contains(&edge.identifier) {
                warn!(
                    "Inheritance cycle through '{}' for {} '{}' in zone '{}'",
                    edge.identifier,
                    role.as_str(),
                    identifier,
                    zone
                );
                continue;
            }
            if done.contains(&edge.identifier) {
                continue;
            }
            if !edge_applies(&edge, &resolved, scope) {
                debug!(
                    "Skipping parent '{}': edge scope not established",
                    edge.identifier
                );
                continue;
            }

            let Some(parent) = self.store.get(zone, role, &edge.identifier).await? else {
                debug!("Parent '{}' not found, ignoring edge", edge.identifier);
                done.insert(edge.identifier);
                continue;
            };

            resolved.extend(parent.attributes.iter().cloned());
            on_path.insert(parent.identifier.clone());
            stack.push(Frame {
                identifier: parent.identifier,
                parents: parent.parents,
                next: 0,
            });
        }

        Ok(resolved)
    }

    /// All entities that inherit, directly or transitively, from the given one
    ///
    /// # Returns
    /// Sorted descendant identifiers, excluding the entity itself
    pub async fn descendants(
        &self,
        zone: &str,
        role: EntityRole,
        identifier: &str,
    ) -> Result<Vec<EntityId>> {
        let entities = self.store.list(zone, role).await?;

        // Reverse adjacency: parent identifier -> children
        let mut children: std::collections::HashMap<&str, Vec<&str>> =
            std::collections::HashMap::new();
        for entity in &entities {
            for edge in &entity.parents {
                children
                    .entry(edge.identifier.as_str())
                    .or_default()
                    .push(entity.identifier.as_str());
            }
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: Vec<&str> = vec![identifier];
        while let Some(current) = queue.pop() {
            if let Some(direct) = children.get(current) {
                for child in direct {
                    if visited.insert(child) {
                        queue.push(child);
                    }
                }
            }
        }

        visited.remove(identifier);
        let mut result: Vec<EntityId> = visited.into_iter().map(String::from).collect();
        result.sort();
        Ok(result)
    }
}

/// Whether an edge's scope is fully established
fn edge_applies(edge: &ParentEdge, accumulated: &AttributeSet, scope: Option<&AttributeSet>) -> bool {
    edge.scope.iter().all(|attribute| {
        accumulated.contains(attribute) || scope.map_or(false, |s| s.contains(attribute))
    })
}
