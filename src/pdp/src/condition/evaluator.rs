//! Condition script evaluator with compiled program caching
//!
//! Scripts are compiled once and cached behind the [`ProgramCache`] trait so
//! deployments can swap the caching strategy without touching evaluation.
//! Each evaluation gets a fresh script context carrying the `subject`,
//! `resource`, and `action` variables plus the `uriVariable` and
//! `attributes` helper functions.

use crate::condition::context::ConditionContext;
use crate::condition::error::{ConditionError, Result};
use cel_interpreter::extractors::This;
use cel_interpreter::objects::{Key, Value};
use cel_interpreter::{Context, ExecutionError, Program};
use dashmap::DashMap;
use std::sync::Arc;

/// Cache of compiled condition programs keyed by script text
pub trait ProgramCache: Send + Sync {
    /// Look up a compiled program
    fn get(&self, script: &str) -> Option<Arc<Program>>;

    /// Store a compiled program
    fn insert(&self, script: &str, program: Arc<Program>);

    /// Number of cached programs
    fn len(&self) -> usize;

    /// Whether the cache is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all cached programs
    fn clear(&self);
}

/// Program cache that never retains anything
///
/// Every evaluation recompiles its script. Useful when scripts are
/// short-lived or memory is at a premium.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonCachingProgramCache;

impl ProgramCache for NonCachingProgramCache {
    fn get(&self, _script: &str) -> Option<Arc<Program>> {
        None
    }

    fn insert(&self, _script: &str, _program: Arc<Program>) {}

    fn len(&self) -> usize {
        0
    }

    fn clear(&self) {}
}

/// Thread-safe in-process program cache
#[derive(Default)]
pub struct InMemoryProgramCache {
    programs: DashMap<String, Arc<Program>>,
}

impl InMemoryProgramCache {
    /// Create an empty program cache
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgramCache for InMemoryProgramCache {
    fn get(&self, script: &str) -> Option<Arc<Program>> {
        self.programs.get(script).map(|entry| entry.clone())
    }

    fn insert(&self, script: &str, program: Arc<Program>) {
        self.programs.insert(script.to_string(), program);
    }

    fn len(&self) -> usize {
        self.programs.len()
    }

    fn clear(&self) {
        self.programs.clear();
    }
}

/// Evaluator for boolean condition scripts
pub struct ConditionEvaluator {
    programs: Arc<dyn ProgramCache>,
}

impl ConditionEvaluator {
    /// Create an evaluator backed by an in-memory program cache
    pub fn new() -> Self {
        Self {
            programs: Arc::new(InMemoryProgramCache::new()),
        }
    }

    /// Create an evaluator with a custom program cache
    pub fn with_cache(programs: Arc<dyn ProgramCache>) -> Self {
        Self { programs }
    }

    /// Compile a condition script, consulting the program cache first
    ///
    /// # Arguments
    /// * `script` - Condition script text
    ///
    /// # Returns
    /// Compiled program (from cache if available)
    ///
    /// # Errors
    /// Returns [`ConditionError::CompilationError`] if the script cannot
    /// be compiled
    pub fn compile(&self, script: &str) -> Result<Arc<Program>> {
        if let Some(program) = self.programs.get(script) {
            return Ok(program);
        }

        let program = Program::compile(script)
            .map_err(|e| ConditionError::CompilationError(format!("{:?}", e)))?;

        let program = Arc::new(program);
        self.programs.insert(script, program.clone());

        Ok(program)
    }

    /// Compile and evaluate a script against a context
    ///
    /// # Arguments
    /// * `script` - Condition script text
    /// * `ctx` - Attributes, URI variables, and action visible to the script
    ///
    /// # Returns
    /// The boolean the script evaluated to
    ///
    /// # Errors
    /// Returns a compilation error for bad script text, an evaluation error
    /// for runtime failures, and [`ConditionError::NonBooleanResult`] when
    /// the script produces anything but a boolean
    pub fn evaluate(&self, script: &str, ctx: &ConditionContext) -> Result<bool> {
        let program = self.compile(script)?;
        self.evaluate_program(&program, ctx)
    }

    /// Evaluate an already-compiled program against a context
    pub fn evaluate_program(&self, program: &Program, ctx: &ConditionContext) -> Result<bool> {
        let mut cel_context = Context::default();

        let _ = cel_context.add_variable("subject", ctx.subject_value());
        let _ = cel_context.add_variable("resource", ctx.resource_value());
        let _ = cel_context.add_variable("action", Value::String(ctx.action().to_string().into()));

        let uri_variables = Arc::new(ctx.uri_variables().clone());
        cel_context.add_function(
            "uriVariable",
            move |This(_this): This<Value>, name: Value| -> std::result::Result<Value, ExecutionError> {
                // Missing variables and non-string names resolve to ""
                Ok(match name {
                    Value::String(name) => Value::String(
                        uri_variables.get(name.as_str()).cloned().unwrap_or_default().into(),
                    ),
                    _ => Value::String(String::new().into()),
                })
            },
        );

        cel_context.add_function(
            "attributes",
            |This(this): This<Value>, issuer: Value, name: Value| -> std::result::Result<Value, ExecutionError> {
                Ok(attribute_values(&this, &issuer, &name))
            },
        );

        let result = program
            .execute(&cel_context)
            .map_err(|e| ConditionError::EvaluationError(format!("{:?}", e)))?;

        match result {
            Value::Bool(b) => Ok(b),
            _ => Err(ConditionError::NonBooleanResult),
        }
    }

    /// Number of programs currently cached
    pub fn cached_programs(&self) -> usize {
        self.programs.len()
    }

    /// Drop all cached programs
    pub fn clear_cache(&self) {
        self.programs.clear();
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Look up the value list for an issuer and name on an attribute map
///
/// Unknown issuers, unknown names, and non-string arguments all resolve to
/// an empty list so membership checks degrade to false instead of erroring.
fn attribute_values(this: &Value, issuer: &Value, name: &Value) -> Value {
    let empty = || Value::List(Arc::new(Vec::new()));

    let (Value::String(issuer), Value::String(name)) = (issuer, name) else {
        return empty();
    };
    let Value::Map(issuers) = this else {
        return empty();
    };
    let Some(Value::Map(names)) = issuers.map.get(&Key::String(issuer.clone())) else {
        return empty();
    };
    match names.map.get(&Key::String(name.clone())) {
        Some(values @ Value::List(_)) => values.clone(),
        _ => empty(),
    }
}
