//! Parameter redaction for log output.

use serde_json::Value as JsonValue;

/// Replacement written in place of a sensitive value.
pub const REDACTED: &str = "[REDACTED]";

/// Key fragments that mark a value as sensitive (matched case-insensitively).
const SENSITIVE_TERMS: &[&str] = &["password", "token", "secret", "key", "credential"];

/// Whether a parameter name looks like it carries a secret.
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_TERMS.iter().any(|term| lower.contains(term))
}

/// Copy `params`, replacing every value stored under a sensitive-looking key.
///
/// Objects are walked recursively, including objects nested inside arrays.
/// The input is never modified.
pub fn sanitize_params(params: &JsonValue) -> JsonValue {
    match params {
        JsonValue::Object(map) => JsonValue::Object(
            map.iter()
                .map(|(k, v)| {
                    let value = if is_sensitive_key(k) {
                        JsonValue::String(REDACTED.to_string())
                    } else {
                        sanitize_params(v)
                    };
                    (k.clone(), value)
                })
                .collect(),
        ),
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(sanitize_params).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_sensitive_keys() {
        let params = json!({"token": "abc", "creator_id": "x"});
        assert_eq!(
            sanitize_params(&params),
            json!({"token": "[REDACTED]", "creator_id": "x"})
        );
    }

    #[test]
    fn test_key_match_is_case_insensitive_substring() {
        assert!(is_sensitive_key("API_KEY"));
        assert!(is_sensitive_key("dbPassword"));
        assert!(is_sensitive_key("refresh_token"));
        assert!(is_sensitive_key("Credentials"));
        assert!(!is_sensitive_key("creator_id"));
        assert!(!is_sensitive_key("sql"));
    }

    #[test]
    fn test_nested_values() {
        let params = json!({
            "auth": {"secret": {"nested": 1}, "user": "ann"},
            "items": [{"password": "p"}, 3],
            "monkey": "banana"
        });
        assert_eq!(
            sanitize_params(&params),
            json!({
                "auth": {"secret": "[REDACTED]", "user": "ann"},
                "items": [{"password": "[REDACTED]"}, 3],
                "monkey": "[REDACTED]"
            })
        );
    }

    #[test]
    fn test_scalars_pass_through() {
        assert_eq!(sanitize_params(&json!("plain")), json!("plain"));
        assert_eq!(sanitize_params(&JsonValue::Null), JsonValue::Null);
    }

    #[test]
    fn test_input_left_untouched() {
        let params = json!({"token": "abc"});
        let _ = sanitize_params(&params);
        assert_eq!(params["token"], "abc");
    }
}
