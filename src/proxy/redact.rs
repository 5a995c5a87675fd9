//! Secret redaction for logged request and response bodies.

use serde_json::{Map, Value};

/// Replacement written over sensitive values.
pub const REDACTED: &str = "[REDACTED]";

/// Object keys containing any of these (case-insensitive) are redacted.
const SENSITIVE_KEY_FRAGMENTS: [&str; 17] = [
    "authorization",
    "api-key",
    "api_key",
    "apikey",
    "x-api-key",
    "x_api_key",
    "access_token",
    "refresh_token",
    "id_token",
    "token",
    "secret",
    "password",
    "client_secret",
    "private_key",
    "ssh_key",
    "sessionid",
    "cookie",
];

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEY_FRAGMENTS
        .iter()
        .any(|fragment| key.contains(fragment))
}

/// Copy of `value` with every sensitive object value replaced by
/// [`REDACTED`], recursively through arrays and objects.
pub fn redact_for_logging(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(redact_for_logging).collect()),
        Value::Object(map) => {
            let redacted: Map<String, Value> = map
                .iter()
                .map(|(key, entry)| {
                    let entry = if is_sensitive_key(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_for_logging(entry)
                    };
                    (key.clone(), entry)
                })
                .collect();
            Value::Object(redacted)
        }
        other => other.clone(),
    }
}
