//! # Trellis Policy Decision Engine
//!
//! Attribute-based access control decisions over zone-scoped policy sets.
//!
//! ## Features
//!
//! - Policy targets with URI templates, type labels, and exact-match actions
//! - CEL condition scripts with compiled program caching
//! - Hierarchical attribute inheritance with scoped parent edges
//! - External attribute adapters behind OAuth client-credentials
//! - Attribute and decision caches: no-op, in-process, or distributed
//! - Deny-overrides combining with an implicit deny
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use trellis_pdp::engine::PdpEngine;
//! use trellis_pdp::hierarchy::{Entity, InMemoryEntityStore};
//! use trellis_pdp::policy::{
//!     Condition, Effect, InMemoryPolicyStore, Policy, PolicySet, PolicySetSelection, Target,
//! };
//! use trellis_pdp::types::{Attribute, EntityRole, PolicyMatchCandidate};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let policies = InMemoryPolicyStore::new();
//!     policies
//!         .put_policy_set(
//!             "acme",
//!             PolicySet::new("default").with_policy(
//!                 Policy::new(
//!                     "Operators can view their sites",
//!                     Target::new("site/{site_id}", "GET"),
//!                     Effect::Permit,
//!                 )
//!                 .with_condition(Condition::new(
//!                     r#"resource.uriVariable("site_id") in subject.attributes("acs", "site")"#,
//!                 )),
//!             ),
//!         )
//!         .await;
//!
//!     let entities = InMemoryEntityStore::new();
//!     entities
//!         .put(
//!             "acme",
//!             EntityRole::Subject,
//!             Entity::new("agent_mulder")
//!                 .with_attribute(Attribute::new("acs", "site", "boston")),
//!         )
//!         .await;
//!
//!     let engine = PdpEngine::builder()
//!         .policy_store(Arc::new(policies))
//!         .entity_store(Arc::new(entities))
//!         .build()?;
//!
//!     let decision = engine
//!         .evaluate(
//!             "acme",
//!             &PolicyMatchCandidate::new("agent_mulder", "site/boston", "GET"),
//!             PolicySetSelection::All,
//!         )
//!         .await?;
//!     assert!(decision.is_permit());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod condition;
pub mod connector;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod matcher;
pub mod policy;
pub mod readers;
pub mod template;
pub mod types;

pub use engine::{Decision, EngineConfig, InvalidationScope, PdpEngine, PdpEngineBuilder};
pub use error::{PdpError, Result};
pub use matcher::{MatchResult, MatchedPolicy, PolicyMatcher};
pub use policy::{Effect, Policy, PolicySet, PolicySetSelection, Target};
pub use types::{Attribute, AttributeSet, PolicyMatchCandidate};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
