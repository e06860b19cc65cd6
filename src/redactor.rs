//! Secret masking for anything that leaves the sandbox boundary.
//!
//! The redactor collects sensitive scalar values from config payloads
//! before execution and replaces every occurrence (including the base64
//! encoding of each value) with a fixed placeholder. The value set is
//! append-only for the lifetime of a run.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// Replacement written over every registered secret.
pub const REDACTION_PLACEHOLDER: &str = "[hidden]";

/// Append-only set of secret values to mask out of process output.
#[derive(Debug, Clone, Default)]
pub struct OutputRedactor {
    values: Vec<String>,
}

impl OutputRedactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a secret value and its base64 form. Empty and
    /// whitespace-only values are ignored, they would shred normal output.
    pub fn register(&mut self, value: &str) {
        if value.trim().is_empty() {
            return;
        }
        for candidate in [value.to_string(), BASE64.encode(value)] {
            if !self.values.contains(&candidate) {
                self.values.push(candidate);
            }
        }
    }

    /// Walks a config payload and registers every scalar stored under a
    /// key with the `#` secret prefix, at any depth.
    pub fn register_from_config(&mut self, payload: &serde_json::Value) {
        match payload {
            serde_json::Value::Object(map) => {
                for (key, value) in map {
                    if key.starts_with('#') {
                        if let Some(scalar) = scalar_to_string(value) {
                            self.register(&scalar);
                        }
                    }
                    self.register_from_config(value);
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    self.register_from_config(item);
                }
            }
            _ => {}
        }
    }

    /// Replaces every registered value in `text` with the placeholder.
    /// Longer values are replaced first so that a secret which contains
    /// another secret leaves no fragment behind.
    pub fn redact(&self, text: &str) -> String {
        let mut ordered: Vec<&String> = self.values.iter().collect();
        ordered.sort_by_key(|v| std::cmp::Reverse(v.len()));

        let mut result = text.to_string();
        for value in ordered {
            result = result.replace(value.as_str(), REDACTION_PLACEHOLDER);
        }
        result
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// String form of a scalar JSON value; objects and arrays yield `None`.
pub(crate) fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_value_and_base64_form() {
        let mut redactor = OutputRedactor::new();
        redactor.register("topsecret");

        let encoded = BASE64.encode("topsecret");
        let text = format!("plain topsecret and encoded {encoded} end");
        let redacted = redactor.redact(&text);

        assert!(!redacted.contains("topsecret"));
        assert!(!redacted.contains(&encoded));
        assert_eq!(redacted, "plain [hidden] and encoded [hidden] end");
    }

    #[test]
    fn test_redaction_is_idempotent() {
        let mut redactor = OutputRedactor::new();
        redactor.register("abc123");
        let once = redactor.redact("value abc123 here");
        let twice = redactor.redact(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_longer_secrets_replaced_first() {
        let mut redactor = OutputRedactor::new();
        redactor.register("secret");
        redactor.register("secret-extended");
        let redacted = redactor.redact("x secret-extended y");
        assert_eq!(redacted, "x [hidden] y");
    }

    #[test]
    fn test_empty_values_ignored() {
        let mut redactor = OutputRedactor::new();
        redactor.register("");
        redactor.register("   ");
        assert!(redactor.is_empty());
        assert_eq!(redactor.redact("unchanged"), "unchanged");
    }

    #[test]
    fn test_register_from_config_nested() {
        let payload = serde_json::json!({
            "parameters": {
                "#api_token": "tok-123",
                "plain": "visible",
                "nested": {
                    "#password": "deep-secret",
                    "count": 7
                }
            },
            "rows": [
                {"#row_key": "rowsecret"}
            ]
        });

        let mut redactor = OutputRedactor::new();
        redactor.register_from_config(&payload);

        let text = "tok-123 visible deep-secret rowsecret";
        let redacted = redactor.redact(text);
        assert_eq!(redacted, "[hidden] visible [hidden] [hidden]");
    }

    #[test]
    fn test_numeric_secret_scalar() {
        let payload = serde_json::json!({"#pin": 4321});
        let mut redactor = OutputRedactor::new();
        redactor.register_from_config(&payload);
        assert_eq!(redactor.redact("pin is 4321"), "pin is [hidden]");
    }

    #[test]
    fn test_duplicate_registration_kept_once() {
        let mut redactor = OutputRedactor::new();
        redactor.register("dup");
        redactor.register("dup");
        assert_eq!(redactor.len(), 2); // value + base64 form
    }
}
