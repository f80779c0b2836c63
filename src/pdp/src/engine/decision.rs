//! Decision type returned by the engine

use crate::policy::Effect;
use crate::types::epoch_millis;
use serde::{Deserialize, Serialize};

/// Outcome of evaluating a decision request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Unique decision id
    pub id: String,

    /// Permit or deny
    pub effect: Effect,

    /// Obligations the enforcement point must honor
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub obligation_ids: Vec<String>,

    /// Policy that determined the outcome; absent for an implicit deny
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<String>,

    /// Human-readable explanation
    pub reason: String,

    /// When the decision was made (epoch milliseconds)
    pub timestamp: u64,
}

impl Decision {
    /// Create a permit decision
    pub fn permit(
        policy_name: impl Into<String>,
        reason: impl Into<String>,
        obligation_ids: Vec<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            effect: Effect::Permit,
            obligation_ids,
            policy_name: Some(policy_name.into()),
            reason: reason.into(),
            timestamp: epoch_millis(),
        }
    }

    /// Create a deny decision
    pub fn deny(policy_name: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            effect: Effect::Deny,
            obligation_ids: Vec::new(),
            policy_name,
            reason: reason.into(),
            timestamp: epoch_millis(),
        }
    }

    /// Whether the decision permits the action
    pub fn is_permit(&self) -> bool {
        self.effect == Effect::Permit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permit_decision() {
        let decision = Decision::permit("allow-read", "matched", vec!["log-access".to_string()]);
        assert!(decision.is_permit());
        assert_eq!(decision.policy_name.as_deref(), Some("allow-read"));
        assert_eq!(decision.obligation_ids, vec!["log-access"]);
        assert!(!decision.id.is_empty());
    }

    #[test]
    fn test_implicit_deny_has_no_policy() {
        let decision = Decision::deny(None, "No applicable policy, implicit deny");
        assert!(!decision.is_permit());
        assert!(decision.policy_name.is_none());
        assert!(decision.obligation_ids.is_empty());
    }

    #[test]
    fn test_serde_roundtrip() {
        let decision = Decision::permit("allow-read", "matched", vec![]);
        let json = serde_json::to_string(&decision).unwrap();
        let parsed: Decision = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, decision.id);
        assert!(parsed.is_permit());
        assert!(parsed.obligation_ids.is_empty());
    }
}
