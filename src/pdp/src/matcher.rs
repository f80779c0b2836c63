//! Policy matching
//!
//! A policy applies to a request when its target matches structurally and
//! every condition evaluates true. Targets are checked cheapest-first:
//! action equality, then type labels, then the URI template. Parsed
//! templates are cached alongside compiled condition programs.

use crate::condition::{ConditionContext, ConditionError, ConditionEvaluator};
use crate::error::{PdpError, Result};
use crate::policy::{Condition, Policy, Target};
use crate::template::{UriTemplate, UriVariables};
use crate::types::PolicyMatchCandidate;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// A policy that applied to a request, with its bound URI variables
#[derive(Debug, Clone)]
pub struct MatchedPolicy {
    pub policy: Policy,
    pub uri_variables: UriVariables,
}

/// Outcome of matching a candidate against a list of policies
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    /// Policies that fully matched, in authored order
    pub matched_policies: Vec<MatchedPolicy>,

    /// Resource URIs some target matched structurally, conditions aside
    pub resolved_uris: HashSet<String>,
}

/// Matches candidates against policies
pub struct PolicyMatcher {
    evaluator: Arc<ConditionEvaluator>,
    templates: DashMap<String, Arc<UriTemplate>>,
}

impl PolicyMatcher {
    /// Create a matcher sharing a condition evaluator
    pub fn new(evaluator: Arc<ConditionEvaluator>) -> Self {
        Self {
            evaluator,
            templates: DashMap::new(),
        }
    }

    /// Policies that apply to the candidate, in authored order
    pub fn match_policies(
        &self,
        policies: &[Policy],
        candidate: &PolicyMatchCandidate,
    ) -> Result<Vec<MatchedPolicy>> {
        Ok(self.match_for_result(policies, candidate)?.matched_policies)
    }

    /// Match and additionally report which resource URIs were resolved
    ///
    /// # Errors
    /// Fails on malformed URI templates and on condition scripts that do
    /// not compile, error at evaluation, or return a non-boolean. A false
    /// condition is not an error; the policy just does not match.
    pub fn match_for_result(
        &self,
        policies: &[Policy],
        candidate: &PolicyMatchCandidate,
    ) -> Result<MatchResult> {
        let mut result = MatchResult::default();

        for policy in policies {
            let Some(uri_variables) = self.target_match(&policy.target, candidate)? else {
                debug!("Policy '{}' target does not match", policy.name);
                continue;
            };

            result
                .resolved_uris
                .insert(candidate.resource_identifier.clone());

            if self.conditions_match(policy, candidate, &uri_variables)? {
                result.matched_policies.push(MatchedPolicy {
                    policy: policy.clone(),
                    uri_variables,
                });
            } else {
                debug!("Policy '{}' conditions did not hold", policy.name);
            }
        }

        Ok(result)
    }

    /// Structural target match, binding URI variables on success
    fn target_match(
        &self,
        target: &Target,
        candidate: &PolicyMatchCandidate,
    ) -> Result<Option<UriVariables>> {
        if target.action != candidate.action {
            return Ok(None);
        }

        if let Some(subject_type) = &target.subject.subject_type {
            if type_label(&candidate.subject_identifier) != subject_type {
                return Ok(None);
            }
        }

        if let Some(resource_type) = &target.resource.resource_type {
            if type_label(&candidate.resource_identifier) != resource_type {
                return Ok(None);
            }
        }

        let template = self.template(&target.resource.uri_template)?;
        Ok(template.matches(&candidate.resource_identifier))
    }

    /// Evaluate conditions in authored order, short-circuiting on false
    fn conditions_match(
        &self,
        policy: &Policy,
        candidate: &PolicyMatchCandidate,
        uri_variables: &UriVariables,
    ) -> Result<bool> {
        if policy.conditions.is_empty() {
            return Ok(true);
        }

        let context = ConditionContext::new()
            .with_subject_attributes(candidate.subject_attributes.clone())
            .with_resource_attributes(candidate.resource_attributes.clone())
            .with_uri_variables(uri_variables.clone())
            .with_action(candidate.action.clone());

        for condition in &policy.conditions {
            match self.evaluator.evaluate(&condition.script, &context) {
                Ok(true) => {}
                Ok(false) => return Ok(false),
                Err(e) => return Err(condition_error(policy, condition, e)),
            }
        }

        Ok(true)
    }

    /// Parse a URI template, consulting the template cache first
    fn template(&self, template: &str) -> Result<Arc<UriTemplate>> {
        if let Some(parsed) = self.templates.get(template) {
            return Ok(parsed.clone());
        }

        let parsed = Arc::new(UriTemplate::parse(template)?);
        self.templates.insert(template.to_string(), parsed.clone());
        Ok(parsed)
    }
}

/// Leading segment of an identifier, used as its type label
fn type_label(identifier: &str) -> &str {
    identifier
        .split(|c| c == '/' || c == ':')
        .next()
        .unwrap_or("")
}

fn condition_error(policy: &Policy, condition: &Condition, e: ConditionError) -> PdpError {
    if e.is_parse_error() {
        PdpError::ConditionParse {
            policy: policy.name.clone(),
            script: condition.script.clone(),
            reason: e.to_string(),
        }
    } else {
        PdpError::ConditionEvaluation {
            policy: policy.name.clone(),
            script: condition.script.clone(),
            reason: e.to_string(),
        }
    }
}
