//! Error types for the policy decision engine

use thiserror::Error;

/// Policy decision engine errors
#[derive(Debug, Error)]
pub enum PdpError {
    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Policy set not found
    #[error("Policy set not found: {0}")]
    PolicySetNotFound(String),

    /// External attribute retrieval failure (adapter unreachable or timed out)
    #[error("Attribute retrieval failed for '{identifier}' via {endpoint}: {reason}")]
    Retrieval {
        endpoint: String,
        identifier: String,
        reason: String,
    },

    /// Resolved attributes exceed the configured payload limits
    #[error("Attributes for '{identifier}' exceed the configured limit: {detail}")]
    AttributeLimitExceeded { identifier: String, detail: String },

    /// Condition script failed to compile to a boolean expression
    #[error("Condition parse error in policy '{policy}': {reason} (script: {script})")]
    ConditionParse {
        policy: String,
        script: String,
        reason: String,
    },

    /// Condition script raised while executing
    #[error("Condition evaluation error in policy '{policy}': {reason} (script: {script})")]
    ConditionEvaluation {
        policy: String,
        script: String,
        reason: String,
    },

    /// Backing store error
    #[error("Store error: {0}")]
    Store(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for decision engine operations
pub type Result<T> = std::result::Result<T, PdpError>;
