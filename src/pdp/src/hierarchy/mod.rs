//! Hierarchical attribute inheritance
//!
//! Subjects and resources can inherit attributes from parent entities,
//! optionally gated by edge scopes. The store holds the graph; the resolver
//! walks it and unions attributes.

pub mod resolver;
pub mod store;

pub use resolver::HierarchyResolver;
pub use store::{Entity, EntityStore, InMemoryEntityStore, ParentEdge};
