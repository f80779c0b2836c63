//! Policy model and policy set storage

use crate::error::Result;
use crate::types::{PolicySetId, ZoneId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Policy effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Effect {
    /// Permit the action
    Permit,
    /// Deny the action
    Deny,
}

/// Resource shape a policy applies to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceTarget {
    /// Resource type label (matched against the identifier's leading segment)
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,

    /// URI template matched against the candidate resource identifier
    pub uri_template: String,
}

/// Subject shape a policy applies to
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubjectTarget {
    /// Subject type label (matched against the identifier's leading segment)
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub subject_type: Option<String>,
}

/// Structural shape of requests a policy applies to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Target name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Resource template
    pub resource: ResourceTarget,

    /// Subject template
    #[serde(default)]
    pub subject: SubjectTarget,

    /// Action the target applies to (matched by exact equality)
    pub action: String,
}

impl Target {
    /// Create a target from a resource URI template and an action
    pub fn new(uri_template: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: None,
            resource: ResourceTarget {
                resource_type: None,
                uri_template: uri_template.into(),
            },
            subject: SubjectTarget::default(),
            action: action.into(),
        }
    }

    /// Restrict the target to subjects with the given type label
    pub fn with_subject_type(mut self, subject_type: impl Into<String>) -> Self {
        self.subject.subject_type = Some(subject_type.into());
        self
    }
}

/// Scripted boolean condition attached to a policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Condition name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Boolean condition script
    pub script: String,
}

impl Condition {
    /// Create an unnamed condition from a script
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            name: None,
            script: script.into(),
        }
    }
}

/// A single access policy: target shape, conditions, and effect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Policy name
    pub name: String,

    /// Structural shape of requests this policy applies to
    pub target: Target,

    /// Conditions that must all evaluate true, in authored order
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Effect when the policy matches
    pub effect: Effect,

    /// Obligations surfaced to the caller when this policy permits
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub obligation_ids: Vec<String>,
}

impl Policy {
    /// Create a policy with no conditions or obligations
    pub fn new(name: impl Into<String>, target: Target, effect: Effect) -> Self {
        Self {
            name: name.into(),
            target,
            conditions: Vec::new(),
            effect,
            obligation_ids: Vec::new(),
        }
    }

    /// Append a condition (evaluated in authored order)
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Attach an obligation id
    pub fn with_obligation_id(mut self, id: impl Into<String>) -> Self {
        self.obligation_ids.push(id.into());
        self
    }
}

/// Opaque obligation expression carried on a policy set
///
/// The engine only surfaces ids of matched PERMIT policies; execution of
/// obligations happens outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObligationExpression {
    /// Obligation identifier referenced by `Policy::obligation_ids`
    pub id: String,

    /// Obligation kind understood by the executing collaborator
    pub kind: String,

    /// Opaque payload
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Ordered collection of policies plus their obligation expressions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySet {
    /// Policy set identifier
    pub id: PolicySetId,

    /// Policies in authoring priority order
    #[serde(default)]
    pub policies: Vec<Policy>,

    /// Obligation expressions referenced by the policies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub obligation_expressions: Vec<ObligationExpression>,
}

impl PolicySet {
    /// Create an empty policy set
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            policies: Vec::new(),
            obligation_expressions: Vec::new(),
        }
    }

    /// Append a policy (authoring order is priority order)
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policies.push(policy);
        self
    }
}

/// Restriction of a decision request to specific policy sets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySetSelection {
    /// Evaluate all policy sets active for the zone
    All,
    /// Evaluate exactly these policy sets, in the given order
    Explicit(Vec<PolicySetId>),
}

/// Read-only policy set storage consumed by the engine
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// All policy sets active for a zone, in authoring order
    async fn get_all_policy_sets(&self, zone: &str) -> Result<Vec<PolicySet>>;

    /// A single policy set by id
    async fn get_policy_set(&self, zone: &str, id: &str) -> Result<Option<PolicySet>>;
}

/// In-memory policy store implementation
pub struct InMemoryPolicyStore {
    sets: Arc<RwLock<HashMap<ZoneId, Vec<PolicySet>>>>,
}

impl InMemoryPolicyStore {
    /// Create a new in-memory policy store
    pub fn new() -> Self {
        Self {
            sets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert or replace a policy set, preserving zone ordering
    pub async fn put_policy_set(&self, zone: &str, set: PolicySet) {
        let mut sets = self.sets.write().await;
        let zone_sets = sets.entry(zone.to_string()).or_default();
        match zone_sets.iter_mut().find(|existing| existing.id == set.id) {
            Some(existing) => *existing = set,
            None => zone_sets.push(set),
        }
    }

    /// Remove a policy set, returning whether it existed
    pub async fn delete_policy_set(&self, zone: &str, id: &str) -> bool {
        let mut sets = self.sets.write().await;
        if let Some(zone_sets) = sets.get_mut(zone) {
            let before = zone_sets.len();
            zone_sets.retain(|set| set.id != id);
            return zone_sets.len() < before;
        }
        false
    }
}

impl Default for InMemoryPolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn get_all_policy_sets(&self, zone: &str) -> Result<Vec<PolicySet>> {
        let sets = self.sets.read().await;
        Ok(sets.get(zone).cloned().unwrap_or_default())
    }

    async fn get_policy_set(&self, zone: &str, id: &str) -> Result<Option<PolicySet>> {
        let sets = self.sets.read().await;
        Ok(sets
            .get(zone)
            .and_then(|zone_sets| zone_sets.iter().find(|set| set.id == id))
            .cloned())
    }
}
