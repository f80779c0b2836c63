//! Core attribute and request types

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Zone (tenant) identifier
pub type ZoneId = String;

/// Subject or resource identifier
pub type EntityId = String;

/// Policy set identifier
pub type PolicySetId = String;

/// Milliseconds since the Unix epoch
pub(crate) fn epoch_millis() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

/// A single attribute issued by an authority
///
/// Two attributes are equal only when issuer, name, and value all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    /// Authority that issued the attribute (e.g., "acs", "https://idp.example.com")
    pub issuer: String,

    /// Attribute name (e.g., "site", "group")
    pub name: String,

    /// Attribute value (e.g., "boston")
    pub value: String,
}

impl Attribute {
    /// Create a new attribute
    pub fn new(
        issuer: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Unordered set of attributes with full-value uniqueness
pub type AttributeSet = HashSet<Attribute>;

/// Role an entity plays in a decision request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRole {
    Subject,
    Resource,
}

impl EntityRole {
    /// Stable label used in cache key namespaces and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityRole::Subject => "subject",
            EntityRole::Resource => "resource",
        }
    }
}

/// Cache envelope for a resolved attribute set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAttributes {
    /// The resolved attributes
    pub attributes: AttributeSet,

    /// Cache write time (milliseconds since epoch)
    pub cached_at: u64,
}

impl CachedAttributes {
    /// Wrap an attribute set, stamping the current time
    pub fn new(attributes: AttributeSet) -> Self {
        Self {
            attributes,
            cached_at: epoch_millis(),
        }
    }

    /// Whether the entry is older than the given time-to-live
    pub fn is_expired(&self, ttl: Duration) -> bool {
        epoch_millis().saturating_sub(self.cached_at) > ttl.as_millis() as u64
    }
}

/// Request-scoped evaluation candidate, never persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyMatchCandidate {
    /// Subject identifier (e.g., "agent_mulder")
    pub subject_identifier: EntityId,

    /// Resource identifier (e.g., "site/boston")
    pub resource_identifier: EntityId,

    /// Action being performed (e.g., "GET")
    pub action: String,

    /// Supplemental subject attributes supplied with the request
    #[serde(default)]
    pub subject_attributes: AttributeSet,

    /// Supplemental resource attributes supplied with the request
    #[serde(default)]
    pub resource_attributes: AttributeSet,
}

impl PolicyMatchCandidate {
    /// Create a new candidate with empty supplemental attribute sets
    pub fn new(
        subject_identifier: impl Into<String>,
        resource_identifier: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject_identifier: subject_identifier.into(),
            resource_identifier: resource_identifier.into(),
            action: action.into(),
            subject_attributes: AttributeSet::new(),
            resource_attributes: AttributeSet::new(),
        }
    }

    /// Add a supplemental subject attribute
    pub fn with_subject_attribute(mut self, attribute: Attribute) -> Self {
        self.subject_attributes.insert(attribute);
        self
    }

    /// Add a supplemental resource attribute
    pub fn with_resource_attribute(mut self, attribute: Attribute) -> Self {
        self.resource_attributes.insert(attribute);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_equality() {
        let a = Attribute::new("acs", "site", "boston");
        let b = Attribute::new("acs", "site", "boston");
        assert_eq!(a, b);

        assert_ne!(a, Attribute::new("idp", "site", "boston"));
        assert_ne!(a, Attribute::new("acs", "group", "boston"));
        assert_ne!(a, Attribute::new("acs", "site", "newyork"));
    }

    #[test]
    fn test_attribute_set_union_is_idempotent() {
        let mut set = AttributeSet::new();
        set.insert(Attribute::new("acs", "site", "boston"));
        set.insert(Attribute::new("acs", "site", "boston"));
        assert_eq!(set.len(), 1);

        let mut other = AttributeSet::new();
        other.insert(Attribute::new("acs", "site", "boston"));
        other.insert(Attribute::new("acs", "site", "newyork"));

        set.extend(other);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_candidate_builder() {
        let candidate = PolicyMatchCandidate::new("agent_mulder", "site/boston", "GET")
            .with_subject_attribute(Attribute::new("acs", "site", "boston"));

        assert_eq!(candidate.subject_identifier, "agent_mulder");
        assert_eq!(candidate.resource_identifier, "site/boston");
        assert_eq!(candidate.action, "GET");
        assert_eq!(candidate.subject_attributes.len(), 1);
        assert!(candidate.resource_attributes.is_empty());
    }

    #[test]
    fn test_cached_attributes_expiry() {
        let cached = CachedAttributes::new(AttributeSet::new());
        assert!(!cached.is_expired(Duration::from_secs(60)));

        let stale = CachedAttributes {
            attributes: AttributeSet::new(),
            cached_at: epoch_millis().saturating_sub(120_000),
        };
        assert!(stale.is_expired(Duration::from_secs(60)));
    }
}
