//! URI template parsing and structural matching

use crate::error::{PdpError, Result};
use regex::Regex;
use std::collections::HashMap;

/// Variable bindings produced by a successful template match
pub type UriVariables = HashMap<String, String>;

/// A URI template such as `site/{site_id}/asset/{asset_id}`
///
/// Literal segments match exactly; each `{name}` variable matches one or
/// more characters excluding `/` and binds the matched text to `name`.
pub struct UriTemplate {
    template: String,
    pattern: Regex,
    variables: Vec<String>,
}

impl UriTemplate {
    /// Parse a template into an anchored matcher
    ///
    /// # Errors
    /// Returns an error for unterminated or invalid variable declarations.
    pub fn parse(template: &str) -> Result<Self> {
        let mut pattern = String::from("^");
        let mut variables = Vec::new();
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            let (literal, tail) = rest.split_at(open);
            pattern.push_str(&regex::escape(literal));

            let Some(close) = tail.find('}') else {
                return Err(PdpError::InvalidInput(format!(
                    "Unterminated variable in URI template '{}'",
                    template
                )));
            };

            let name = &tail[1..close];
            if !is_valid_variable_name(name) {
                return Err(PdpError::InvalidInput(format!(
                    "Invalid variable name '{}' in URI template '{}'",
                    name, template
                )));
            }

            pattern.push_str(&format!("(?P<{}>[^/]+)", name));
            variables.push(name.to_string());
            rest = &tail[close + 1..];
        }

        pattern.push_str(&regex::escape(rest));
        pattern.push('$');

        let pattern = Regex::new(&pattern).map_err(|e| {
            PdpError::InvalidInput(format!("Invalid URI template '{}': {}", template, e))
        })?;

        Ok(Self {
            template: template.to_string(),
            pattern,
            variables,
        })
    }

    /// Match a URI against the template, binding variables on success
    pub fn matches(&self, uri: &str) -> Option<UriVariables> {
        let captures = self.pattern.captures(uri)?;

        let mut bindings = UriVariables::new();
        for name in &self.variables {
            if let Some(value) = captures.name(name) {
                bindings.insert(name.clone(), value.as_str().to_string());
            }
        }
        Some(bindings)
    }

    /// Whether the URI matches without extracting bindings
    pub fn is_match(&self, uri: &str) -> bool {
        self.pattern.is_match(uri)
    }

    /// The original template text
    pub fn as_str(&self) -> &str {
        &self.template
    }
}

fn is_valid_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
