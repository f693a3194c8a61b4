//! Shared helpers for channel transports.

use serde_json::Value;

/// Cap on error text stored on a delivery method or recipient entry.
pub const MAX_ERROR_LENGTH: usize = 200;

/// Truncate a string to at most `max_len` bytes, backing off to a char
/// boundary, with a marker when anything was cut.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}

/// Redact sensitive fields from a JSON configuration blob.
///
/// Values under keys that commonly hold credentials (passwords, tokens,
/// secrets, API keys) are replaced with `"***"`, recursively through
/// nested objects and arrays. Used when channel configuration is logged
/// or surfaced to operators.
pub fn redact_sensitive_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, val) in map {
                if is_sensitive_key(key) {
                    out.insert(key.clone(), Value::String("***".to_string()));
                } else if val.is_object() || val.is_array() {
                    out.insert(key.clone(), redact_sensitive_json(val));
                } else {
                    out.insert(key.clone(), val.clone());
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_json).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    key.contains("password")
        || key.contains("passwd")
        || key.contains("secret")
        || key.contains("token")
        || key.contains("api_key")
        || key.contains("apikey")
        || key.contains("credential")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("hello world", 5), "hello... [truncated]");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "héllo";
        let out = truncate_string(s, 2);
        assert!(out.starts_with('h'));
        assert!(out.ends_with("[truncated]"));
    }

    #[test]
    fn test_redact_sensitive_json() {
        let config = serde_json::json!({
            "smtp_host": "smtp.example.com",
            "smtp_password": "hunter2",
            "api_key": "k-123",
            "gateway": {
                "auth_token": "t-456",
                "url": "https://sms.example.com"
            }
        });
        let redacted = redact_sensitive_json(&config);
        assert_eq!(redacted["smtp_host"], "smtp.example.com");
        assert_eq!(redacted["smtp_password"], "***");
        assert_eq!(redacted["api_key"], "***");
        assert_eq!(redacted["gateway"]["auth_token"], "***");
        assert_eq!(redacted["gateway"]["url"], "https://sms.example.com");
    }
}
