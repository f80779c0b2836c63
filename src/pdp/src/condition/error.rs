//! Condition evaluation error types

use thiserror::Error;

/// Errors surfaced while compiling or evaluating condition scripts
#[derive(Debug, Error)]
pub enum ConditionError {
    /// The script failed to compile
    #[error("Compilation error: {0}")]
    CompilationError(String),

    /// The script compiled but failed at evaluation time
    #[error("Evaluation error: {0}")]
    EvaluationError(String),

    /// The script evaluated to something other than a boolean
    #[error("Condition script must evaluate to a boolean")]
    NonBooleanResult,
}

impl ConditionError {
    /// Whether the error is attributable to the script text itself
    /// rather than the evaluation environment
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            ConditionError::CompilationError(_) | ConditionError::NonBooleanResult
        )
    }
}

/// Result type for condition operations
pub type Result<T> = std::result::Result<T, ConditionError>;
