//! Typed build parameters for on-the-fly image recipes.
//!
//! Each declared parameter validates its assigned value before it can
//! reach a Dockerfile. `argument` values are shell-quoted exactly once,
//! at assignment, so a recipe never has to reason about quoting.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::BuildError;
use crate::invocation::quote;
use crate::redactor::scalar_to_string;

/// Validation discipline applied to a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    /// Any string, substituted verbatim.
    String,
    /// Must parse as a 64-bit integer.
    Integer,
    /// Any string, shell-quoted once on assignment.
    Argument,
    /// Restricted to `[A-Za-z0-9_.-]+`.
    PlainString,
    /// Must be one of the declared `values`.
    Enumeration,
}

fn plain_string_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").unwrap())
}

/// One declared parameter of a build recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParameterType,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Allowed values; only meaningful for `enumeration`.
    #[serde(default)]
    pub values: Vec<String>,
    /// Validated value, set via [`assign`](Self::assign).
    #[serde(skip)]
    value: Option<String>,
}

fn default_required() -> bool {
    true
}

impl BuilderParameter {
    pub fn new(name: &str, kind: ParameterType, required: bool) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required,
            values: Vec::new(),
            value: None,
        }
    }

    /// Checks the declaration itself, independent of any value.
    pub fn validate_spec(&self) -> Result<(), BuildError> {
        if self.kind == ParameterType::Enumeration && self.values.is_empty() {
            return Err(BuildError::InvalidParameter {
                name: self.name.clone(),
                reason: "enumeration parameter declares no allowed values".to_string(),
            });
        }
        Ok(())
    }

    /// Validates and stores a value. Non-scalar JSON is rejected for
    /// every type.
    pub fn assign(&mut self, raw: &serde_json::Value) -> Result<(), BuildError> {
        let text = scalar_to_string(raw).ok_or_else(|| BuildError::InvalidParameter {
            name: self.name.clone(),
            reason: "value must be a scalar".to_string(),
        })?;

        let stored = match self.kind {
            ParameterType::String => text,
            ParameterType::Integer => {
                text.parse::<i64>()
                    .map_err(|_| BuildError::InvalidParameter {
                        name: self.name.clone(),
                        reason: format!("'{text}' is not an integer"),
                    })?;
                text
            }
            ParameterType::Argument => quote(&text),
            ParameterType::PlainString => {
                if !plain_string_pattern().is_match(&text) {
                    return Err(BuildError::InvalidParameter {
                        name: self.name.clone(),
                        reason: format!("'{text}' contains characters outside [A-Za-z0-9_.-]"),
                    });
                }
                text
            }
            ParameterType::Enumeration => {
                if !self.values.contains(&text) {
                    return Err(BuildError::InvalidParameter {
                        name: self.name.clone(),
                        reason: format!(
                            "'{text}' is not one of: {}",
                            self.values.join(", ")
                        ),
                    });
                }
                text
            }
        };
        self.value = Some(stored);
        Ok(())
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }
}
