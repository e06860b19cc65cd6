//! Environment variables injected into the sandboxed process.
//!
//! Fixed `KBC_*` keys describing the run, plus opt-in
//! `KBC_PARAMETER_<NAME>` variables for scalar configuration values.
//! Secret scalars are registered with the redactor before injection, so
//! they never leave the sandbox unmasked.

use std::collections::BTreeMap;

use crate::redactor::{scalar_to_string, OutputRedactor};

/// Identity of the run, supplied by the job queue.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub run_id: String,
    pub project_id: String,
    pub config_id: String,
    pub component_id: String,
    pub stack_id: String,
    pub branch_id: Option<String>,
    pub config_row_id: Option<String>,
}

/// Builds the fixed environment for one stage. A `BTreeMap` keeps the
/// flag order deterministic for command construction.
pub fn build_environment(context: &RunContext, data_dir: &str) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("KBC_RUNID".to_string(), context.run_id.clone());
    env.insert("KBC_PROJECTID".to_string(), context.project_id.clone());
    env.insert("KBC_DATADIR".to_string(), data_dir.to_string());
    env.insert("KBC_CONFIGID".to_string(), context.config_id.clone());
    env.insert("KBC_COMPONENTID".to_string(), context.component_id.clone());
    env.insert("KBC_STACKID".to_string(), context.stack_id.clone());
    if let Some(branch_id) = &context.branch_id {
        env.insert("KBC_BRANCHID".to_string(), branch_id.clone());
    }
    if let Some(row_id) = &context.config_row_id {
        env.insert("KBC_CONFIGROWID".to_string(), row_id.clone());
    }
    env
}

/// Injects one `KBC_PARAMETER_<SANITIZED_NAME>` variable per root-level
/// scalar in `parameters`. Secret values (keys prefixed `#`) are
/// registered with the redactor first.
pub fn inject_parameters(
    env: &mut BTreeMap<String, String>,
    parameters: &serde_json::Value,
    redactor: &mut OutputRedactor,
) {
    let Some(map) = parameters.as_object() else {
        return;
    };
    for (key, value) in map {
        let Some(scalar) = scalar_to_string(value) else {
            continue;
        };
        let secret = key.starts_with('#');
        if secret {
            redactor.register(&scalar);
        }
        let name = sanitize_parameter_name(key.trim_start_matches('#'));
        env.insert(format!("KBC_PARAMETER_{name}"), scalar);
    }
}

/// Uppercases a parameter name and replaces everything outside
/// `[A-Za-z0-9]` with underscores.
pub fn sanitize_parameter_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
