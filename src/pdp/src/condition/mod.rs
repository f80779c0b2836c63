//! Condition script compilation and evaluation
//!
//! Policies attach boolean scripts that run against the resolved subject
//! and resource attributes. This module compiles scripts once, caches the
//! programs, and evaluates them with the request's variables and helper
//! functions in scope.

pub mod context;
pub mod error;
pub mod evaluator;

pub use context::ConditionContext;
pub use error::ConditionError;
pub use evaluator::{
    ConditionEvaluator, InMemoryProgramCache, NonCachingProgramCache, ProgramCache,
};
