//! Evaluation context handed to condition scripts
//!
//! The context carries the resolved subject and resource attributes, the
//! URI variables bound by target matching, and the requested action. It is
//! converted into script-engine values lazily, once per policy evaluation.

use crate::template::UriVariables;
use crate::types::AttributeSet;
use cel_interpreter::objects::{Key, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Inputs visible to a condition script
#[derive(Debug, Clone, Default)]
pub struct ConditionContext {
    subject_attributes: AttributeSet,
    resource_attributes: AttributeSet,
    uri_variables: UriVariables,
    action: String,
}

impl ConditionContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the subject attributes
    pub fn with_subject_attributes(mut self, attributes: AttributeSet) -> Self {
        self.subject_attributes = attributes;
        self
    }

    /// Set the resource attributes
    pub fn with_resource_attributes(mut self, attributes: AttributeSet) -> Self {
        self.resource_attributes = attributes;
        self
    }

    /// Set the URI variables bound during target matching
    pub fn with_uri_variables(mut self, variables: UriVariables) -> Self {
        self.uri_variables = variables;
        self
    }

    /// Set the requested action
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    /// Subject attributes as a script value
    pub fn subject_value(&self) -> Value {
        attribute_map(&self.subject_attributes)
    }

    /// Resource attributes as a script value
    pub fn resource_value(&self) -> Value {
        attribute_map(&self.resource_attributes)
    }

    /// URI variables bound during target matching
    pub fn uri_variables(&self) -> &UriVariables {
        &self.uri_variables
    }

    /// Requested action
    pub fn action(&self) -> &str {
        &self.action
    }
}

/// Convert an attribute set into a nested issuer -> name -> [values] map
///
/// Multiple attributes sharing an issuer and name contribute one list with
/// all their values. An empty set becomes an empty map, never null.
pub(crate) fn attribute_map(attributes: &AttributeSet) -> Value {
    let mut by_issuer: HashMap<String, HashMap<String, Vec<String>>> = HashMap::new();
    for attribute in attributes {
        by_issuer
            .entry(attribute.issuer.clone())
            .or_default()
            .entry(attribute.name.clone())
            .or_default()
            .push(attribute.value.clone());
    }

    let mut issuer_map: HashMap<Key, Value> = HashMap::new();
    for (issuer, names) in by_issuer {
        let mut name_map: HashMap<Key, Value> = HashMap::new();
        for (name, mut values) in names {
            // Stable ordering so scripts comparing lists behave deterministically
            values.sort();
            let list: Vec<Value> = values.into_iter().map(|v| Value::String(v.into())).collect();
            name_map.insert(Key::from(name), Value::List(list.into()));
        }
        issuer_map.insert(
            Key::from(issuer),
            Value::Map(Map {
                map: Arc::new(name_map),
            }),
        );
    }

    Value::Map(Map {
        map: Arc::new(issuer_map),
    })
}
