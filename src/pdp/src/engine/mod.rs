//! Decision engine orchestration
//!
//! The engine wires the stores, caches, readers, and matcher together and
//! exposes the decision operation: resolve attributes, select policy sets,
//! match, and combine effects with deny-overrides. Anything that prevents a
//! trustworthy decision is an error, never a permit.

pub mod decision;

pub use decision::Decision;

use crate::cache::{
    AttributeCache, DecisionCache, DecisionCacheKey, NoOpAttributeCache, NoOpDecisionCache,
};
use crate::condition::{ConditionEvaluator, ProgramCache};
use crate::connector::{AdapterClient, ConnectorRegistry, InMemoryConnectorRegistry};
use crate::error::{PdpError, Result};
use crate::hierarchy::{EntityStore, HierarchyResolver};
use crate::matcher::{MatchedPolicy, PolicyMatcher};
use crate::policy::{Effect, PolicySet, PolicySetSelection, PolicyStore};
use crate::readers::{AttributeLimits, ResourceAttributeReader, SubjectAttributeReader};
use crate::types::{AttributeSet, PolicyMatchCandidate};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Caps on resolved attribute sets
    pub attribute_limits: AttributeLimits,

    /// Per-call timeout for external adapter requests
    pub adapter_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            attribute_limits: AttributeLimits::default(),
            adapter_timeout: Duration::from_secs(3),
        }
    }
}

/// Scope of a decision cache invalidation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationScope {
    /// Every entry in the zone
    Zone,
    /// Entries for one subject
    Subject(String),
    /// Entries for one resource
    Resource(String),
    /// Entries evaluated against one policy set
    PolicySet(String),
}

/// Policy decision engine
pub struct PdpEngine {
    policy_store: Arc<dyn PolicyStore>,
    subject_reader: SubjectAttributeReader,
    resource_reader: ResourceAttributeReader,
    matcher: PolicyMatcher,
    attribute_cache: Arc<dyn AttributeCache>,
    decision_cache: Arc<dyn DecisionCache>,
}

impl PdpEngine {
    /// Start building an engine
    pub fn builder() -> PdpEngineBuilder {
        PdpEngineBuilder::new()
    }

    /// Evaluate a decision request
    ///
    /// # Arguments
    /// * `zone` - Zone to evaluate in
    /// * `candidate` - Subject, resource, action, and any caller-supplied attributes
    /// * `selection` - Which policy sets to evaluate against
    ///
    /// # Returns
    /// A decision with its effect and the obligations of matched PERMIT
    /// policies
    ///
    /// # Errors
    /// Fails when attribute retrieval fails, when a selected policy set
    /// does not exist, or when a condition script cannot be evaluated
    pub async fn evaluate(
        &self,
        zone: &str,
        candidate: &PolicyMatchCandidate,
        selection: PolicySetSelection,
    ) -> Result<Decision> {
        let started = Instant::now();
        debug!(
            "Evaluating '{}' on '{}' by '{}' in zone '{}'",
            candidate.action, candidate.resource_identifier, candidate.subject_identifier, zone
        );

        let cache_key = DecisionCacheKey::new(
            zone,
            &candidate.subject_identifier,
            &candidate.resource_identifier,
            &candidate.action,
            selection.clone(),
        );
        if let Some(cached) = self.decision_cache.get(&cache_key).await {
            debug!("Decision cache hit in zone '{}'", zone);
            return Ok(cached);
        }

        let (subject_attributes, resource_attributes) = futures::try_join!(
            self.subject_reader
                .get_attributes(zone, &candidate.subject_identifier),
            self.resource_reader
                .get_attributes(zone, &candidate.resource_identifier),
        )?;

        let mut enriched = candidate.clone();
        enriched.subject_attributes.extend(subject_attributes);
        enriched.resource_attributes.extend(resource_attributes);

        let policy_sets = self.select_policy_sets(zone, &selection).await?;

        let mut matched = Vec::new();
        for set in &policy_sets {
            let mut matches = self.matcher.match_policies(&set.policies, &enriched)?;
            debug!("Policy set '{}' matched {} policies", set.id, matches.len());
            matched.append(&mut matches);
        }

        let decision = Self::combine(&matched);
        info!(
            "Decision {} for '{}' on '{}' by '{}' in zone '{}' ({} ms)",
            if decision.is_permit() { "PERMIT" } else { "DENY" },
            candidate.action,
            candidate.resource_identifier,
            candidate.subject_identifier,
            zone,
            started.elapsed().as_millis()
        );

        self.decision_cache.set(&cache_key, &decision).await;
        Ok(decision)
    }

    /// Subject attributes resolved with an explicit scope filter
    ///
    /// Bypasses the attribute cache; see
    /// [`SubjectAttributeReader::get_attributes_by_scope`].
    pub async fn subject_attributes_by_scope(
        &self,
        zone: &str,
        identifier: &str,
        scope: &AttributeSet,
    ) -> Result<AttributeSet> {
        self.subject_reader
            .get_attributes_by_scope(zone, identifier, scope)
            .await
    }

    /// Flush cached attributes for a zone
    pub async fn flush_attribute_cache(&self, zone: &str) {
        self.attribute_cache.flush_zone(zone).await;
        info!("Attribute cache flushed for zone '{}'", zone);
    }

    /// Invalidate cached decisions for a zone, wholly or by scope
    pub async fn invalidate_decision_cache(&self, zone: &str, scope: InvalidationScope) {
        match &scope {
            InvalidationScope::Zone => self.decision_cache.invalidate_zone(zone).await,
            InvalidationScope::Subject(id) => {
                self.decision_cache.invalidate_subject(zone, id).await
            }
            InvalidationScope::Resource(id) => {
                self.decision_cache.invalidate_resource(zone, id).await
            }
            InvalidationScope::PolicySet(id) => {
                self.decision_cache.invalidate_policy_set(zone, id).await
            }
        }
        info!("Decision cache invalidated for zone '{}' ({:?})", zone, scope);
    }

    async fn select_policy_sets(
        &self,
        zone: &str,
        selection: &PolicySetSelection,
    ) -> Result<Vec<PolicySet>> {
        match selection {
            PolicySetSelection::All => self.policy_store.get_all_policy_sets(zone).await,
            PolicySetSelection::Explicit(ids) => {
                let mut sets = Vec::with_capacity(ids.len());
                for id in ids {
                    let set = self
                        .policy_store
                        .get_policy_set(zone, id)
                        .await?
                        .ok_or_else(|| PdpError::PolicySetNotFound(id.clone()))?;
                    sets.push(set);
                }
                Ok(sets)
            }
        }
    }

    /// Combine matched policies: any deny wins, then permits, else deny
    fn combine(matched: &[MatchedPolicy]) -> Decision {
        if let Some(deny) = matched.iter().find(|m| m.policy.effect == Effect::Deny) {
            return Decision::deny(
                Some(deny.policy.name.clone()),
                format!("Denied by policy '{}'", deny.policy.name),
            );
        }

        let permits: Vec<&MatchedPolicy> = matched
            .iter()
            .filter(|m| m.policy.effect == Effect::Permit)
            .collect();
        if let Some(first) = permits.first() {
            let mut obligation_ids: Vec<String> = Vec::new();
            for permit in &permits {
                for id in &permit.policy.obligation_ids {
                    if !obligation_ids.contains(id) {
                        obligation_ids.push(id.clone());
                    }
                }
            }
            return Decision::permit(
                first.policy.name.clone(),
                format!("Permitted by policy '{}'", first.policy.name),
                obligation_ids,
            );
        }

        Decision::deny(None, "No applicable policy, implicit deny")
    }
}

/// Builder for [`PdpEngine`]
pub struct PdpEngineBuilder {
    policy_store: Option<Arc<dyn PolicyStore>>,
    entity_store: Option<Arc<dyn EntityStore>>,
    connector_registry: Option<Arc<dyn ConnectorRegistry>>,
    attribute_cache: Arc<dyn AttributeCache>,
    decision_cache: Arc<dyn DecisionCache>,
    program_cache: Option<Arc<dyn ProgramCache>>,
    config: EngineConfig,
}

impl PdpEngineBuilder {
    /// Create a builder with no-op caches and no connectors
    pub fn new() -> Self {
        Self {
            policy_store: None,
            entity_store: None,
            connector_registry: None,
            attribute_cache: Arc::new(NoOpAttributeCache),
            decision_cache: Arc::new(NoOpDecisionCache),
            program_cache: None,
            config: EngineConfig::default(),
        }
    }

    /// Set the policy store (required)
    pub fn policy_store(mut self, store: Arc<dyn PolicyStore>) -> Self {
        self.policy_store = Some(store);
        self
    }

    /// Set the entity store backing the hierarchy (required)
    pub fn entity_store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.entity_store = Some(store);
        self
    }

    /// Set the connector registry
    pub fn connector_registry(mut self, registry: Arc<dyn ConnectorRegistry>) -> Self {
        self.connector_registry = Some(registry);
        self
    }

    /// Set the attribute cache
    pub fn attribute_cache(mut self, cache: Arc<dyn AttributeCache>) -> Self {
        self.attribute_cache = cache;
        self
    }

    /// Set the decision cache
    pub fn decision_cache(mut self, cache: Arc<dyn DecisionCache>) -> Self {
        self.decision_cache = cache;
        self
    }

    /// Set the condition program cache
    pub fn program_cache(mut self, cache: Arc<dyn ProgramCache>) -> Self {
        self.program_cache = Some(cache);
        self
    }

    /// Set the engine configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the engine
    ///
    /// # Errors
    /// Fails if a required store is missing or the adapter client cannot
    /// be constructed
    pub fn build(self) -> Result<PdpEngine> {
        let policy_store = self
            .policy_store
            .ok_or_else(|| PdpError::InvalidInput("policy store is required".to_string()))?;
        let entity_store = self
            .entity_store
            .ok_or_else(|| PdpError::InvalidInput("entity store is required".to_string()))?;

        let registry = self
            .connector_registry
            .unwrap_or_else(|| Arc::new(InMemoryConnectorRegistry::new()));
        let client = Arc::new(AdapterClient::new(self.config.adapter_timeout)?);
        let hierarchy = Arc::new(HierarchyResolver::new(entity_store));

        let evaluator = Arc::new(match self.program_cache {
            Some(cache) => ConditionEvaluator::with_cache(cache),
            None => ConditionEvaluator::new(),
        });

        let subject_reader = SubjectAttributeReader::new(
            self.attribute_cache.clone(),
            hierarchy.clone(),
            registry.clone(),
            client.clone(),
            self.config.attribute_limits,
        );
        let resource_reader = ResourceAttributeReader::new(
            self.attribute_cache.clone(),
            hierarchy,
            registry,
            client,
            self.config.attribute_limits,
        );

        info!("Policy decision engine initialized");

        Ok(PdpEngine {
            policy_store,
            subject_reader,
            resource_reader,
            matcher: PolicyMatcher::new(evaluator),
            attribute_cache: self.attribute_cache,
            decision_cache: self.decision_cache,
        })
    }
}

impl Default for PdpEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
