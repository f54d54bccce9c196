//! Bounded JSON parsing and best-effort JSON extraction.
//!
//! This is the load-bearing module for every place the core accepts JSON
//! from an external service or a model: parsing enforces size, depth,
//! array-length and object-key limits; [`extract_json`] digs a balanced
//! JSON object out of free text for models that wrap JSON in prose.

use serde_json::Value;
use thiserror::Error;

/// Default maximum serialized size in bytes (10 MB).
pub const MAX_JSON_SIZE: usize = 10_000_000;
/// Default maximum nesting depth.
pub const MAX_JSON_DEPTH: usize = 20;
/// Default maximum array length.
pub const MAX_ARRAY_LENGTH: usize = 10_000;
/// Default maximum object key count.
pub const MAX_DICT_KEYS: usize = 1_000;

/// Internal recursion ceiling for depth computation.
const RECURSION_GUARD: usize = 100;

/// Limits applied to parsed JSON structures.
#[derive(Debug, Clone)]
pub struct JsonLimits {
    pub max_size: usize,
    pub max_depth: usize,
    pub max_array_length: usize,
    pub max_dict_keys: usize,
}

impl Default for JsonLimits {
    fn default() -> Self {
        Self {
            max_size: MAX_JSON_SIZE,
            max_depth: MAX_JSON_DEPTH,
            max_array_length: MAX_ARRAY_LENGTH,
            max_dict_keys: MAX_DICT_KEYS,
        }
    }
}

/// Why a JSON document was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JsonGuardError {
    #[error("JSON size ({actual} bytes) exceeds maximum ({max} bytes)")]
    TooLarge { actual: usize, max: usize },
    #[error("invalid JSON: {0}")]
    Invalid(String),
    #[error("JSON depth ({actual}) exceeds maximum ({max})")]
    TooDeep { actual: usize, max: usize },
    #[error("array at {path} has {len} items, exceeds maximum ({max})")]
    ArrayTooLong { path: String, len: usize, max: usize },
    #[error("object at {path} has {len} keys, exceeds maximum ({max})")]
    TooManyKeys { path: String, len: usize, max: usize },
}

fn depth_of(value: &Value, current: usize) -> std::result::Result<usize, JsonGuardError> {
    if current > RECURSION_GUARD {
        return Err(JsonGuardError::TooDeep {
            actual: current,
            max: RECURSION_GUARD,
        });
    }
    match value {
        Value::Object(map) => {
            let mut max = current;
            for v in map.values() {
                max = max.max(depth_of(v, current + 1)?);
            }
            Ok(max)
        }
        Value::Array(items) => {
            let mut max = current;
            for v in items {
                max = max.max(depth_of(v, current + 1)?);
            }
            Ok(max)
        }
        _ => Ok(current),
    }
}

fn check_limits(
    value: &Value,
    path: &str,
    limits: &JsonLimits,
) -> std::result::Result<(), JsonGuardError> {
    match value {
        Value::Object(map) => {
            if map.len() > limits.max_dict_keys {
                return Err(JsonGuardError::TooManyKeys {
                    path: path.to_string(),
                    len: map.len(),
                    max: limits.max_dict_keys,
                });
            }
            for (key, v) in map {
                check_limits(v, &format!("{path}.{key}"), limits)?;
            }
        }
        Value::Array(items) => {
            if items.len() > limits.max_array_length {
                return Err(JsonGuardError::ArrayTooLong {
                    path: path.to_string(),
                    len: items.len(),
                    max: limits.max_array_length,
                });
            }
            for (i, v) in items.iter().enumerate() {
                check_limits(v, &format!("{path}[{i}]"), limits)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Validate an already-parsed value against the structural limits.
pub fn validate_json_structure(
    value: &Value,
    limits: &JsonLimits,
) -> std::result::Result<(), JsonGuardError> {
    let depth = depth_of(value, 0)?;
    if depth > limits.max_depth {
        return Err(JsonGuardError::TooDeep {
            actual: depth,
            max: limits.max_depth,
        });
    }
    check_limits(value, "root", limits)
}

/// Parse JSON with size and structure validation. Never panics.
pub fn safe_json_parse(data: &str, limits: &JsonLimits) -> std::result::Result<Value, JsonGuardError> {
    if data.len() > limits.max_size {
        return Err(JsonGuardError::TooLarge {
            actual: data.len(),
            max: limits.max_size,
        });
    }
    let value: Value = serde_json::from_str(data)
        .map_err(|e| JsonGuardError::Invalid(format!("{e} at position {}", e.column())))?;
    validate_json_structure(&value, limits)?;
    Ok(value)
}

/// Best-effort extraction of the first balanced JSON object from free text.
///
/// Scans for `{…}` regions with nesting- and string-escape-aware matching
/// and returns the first region that parses as JSON. Used for models that
/// return JSON embedded in prose.
///
/// # Examples
///
/// ```
/// use digest_pipeline::json_guard::extract_json;
///
/// let parsed = extract_json(r#"Sure! Here you go: {"tldr": "short"} hope it helps"#);
/// assert_eq!(parsed.unwrap()["tldr"], "short");
/// ```
pub fn extract_json(text: &str) -> Option<Value> {
    let mut scan_from = 0;
    while scan_from < text.len() {
        let offset = text[scan_from..].find('{')?;
        let start = scan_from + offset;
        let mut depth = 0i32;
        let mut in_string = false;
        let mut escape_next = false;
        let mut found_end = None;

        for (i, ch) in text[start..].char_indices() {
            if escape_next {
                escape_next = false;
                continue;
            }
            if ch == '\\' && in_string {
                escape_next = true;
                continue;
            }
            if ch == '"' {
                in_string = !in_string;
                continue;
            }
            if in_string {
                continue;
            }
            if ch == '{' {
                depth += 1;
            } else if ch == '}' {
                depth -= 1;
                if depth == 0 {
                    found_end = Some(start + i);
                    break;
                }
            }
        }

        match found_end {
            Some(end) => {
                let candidate = &text[start..=end];
                if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                    return Some(value);
                }
                scan_from = start + 1;
            }
            None => return None,
        }
    }
    None
}

/// Outcome of normalizing a legacy stored JSON value.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyNormalization {
    /// Normalized value to use (None when the stored value was blank).
    pub value: Option<Value>,
    /// Whether the stored row should be rewritten.
    pub should_update: bool,
    /// Explanation when normalization happened ("blank" | "invalid_json").
    pub reason: Option<&'static str>,
}

/// Normalize a legacy stored value: `None` passes through, a whitespace-only
/// string becomes null with a rewrite flag, a non-JSON string is wrapped as
/// `{"__legacy_text__": <text>}` with a rewrite flag.
pub fn normalize_legacy_json_value(raw: Option<&str>) -> LegacyNormalization {
    match raw {
        None => LegacyNormalization {
            value: None,
            should_update: false,
            reason: None,
        },
        Some(s) => {
            let stripped = s.trim();
            if stripped.is_empty() {
                return LegacyNormalization {
                    value: None,
                    should_update: true,
                    reason: Some("blank"),
                };
            }
            match serde_json::from_str::<Value>(stripped) {
                Ok(_) => LegacyNormalization {
                    value: None,
                    should_update: false,
                    reason: None,
                },
                Err(_) => LegacyNormalization {
                    value: Some(serde_json::json!({ "__legacy_text__": stripped })),
                    should_update: true,
                    reason: Some("invalid_json"),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_safe_parse_valid() {
        let value = safe_json_parse(r#"{"a": [1, 2, 3]}"#, &JsonLimits::default()).unwrap();
        assert_eq!(value["a"][1], 2);
    }

    #[test]
    fn test_safe_parse_invalid_json() {
        let err = safe_json_parse("not json", &JsonLimits::default()).unwrap_err();
        assert!(matches!(err, JsonGuardError::Invalid(_)));
    }

    #[test]
    fn test_size_limit() {
        let limits = JsonLimits {
            max_size: 10,
            ..JsonLimits::default()
        };
        let err = safe_json_parse(r#"{"key": "a long value"}"#, &limits).unwrap_err();
        assert!(matches!(err, JsonGuardError::TooLarge { .. }));
    }

    #[test]
    fn test_depth_limit() {
        let limits = JsonLimits {
            max_depth: 3,
            ..JsonLimits::default()
        };
        let deep = r#"{"a": {"b": {"c": {"d": 1}}}}"#;
        let err = safe_json_parse(deep, &limits).unwrap_err();
        assert!(matches!(err, JsonGuardError::TooDeep { .. }));

        let ok = r#"{"a": {"b": 1}}"#;
        assert!(safe_json_parse(ok, &limits).is_ok());
    }

    #[test]
    fn test_array_length_limit() {
        let limits = JsonLimits {
            max_array_length: 3,
            ..JsonLimits::default()
        };
        let err = safe_json_parse("[1, 2, 3, 4]", &limits).unwrap_err();
        assert!(matches!(err, JsonGuardError::ArrayTooLong { .. }));
    }

    #[test]
    fn test_dict_keys_limit() {
        let limits = JsonLimits {
            max_dict_keys: 2,
            ..JsonLimits::default()
        };
        let err = safe_json_parse(r#"{"a": 1, "b": 2, "c": 3}"#, &limits).unwrap_err();
        match err {
            JsonGuardError::TooManyKeys { path, len, .. } => {
                assert_eq!(path, "root");
                assert_eq!(len, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    // ── extract_json ──

    #[test]
    fn test_extract_json_from_prose() {
        let value = extract_json(r#"The result is {"summary_250": "x"} as requested."#).unwrap();
        assert_eq!(value["summary_250"], "x");
    }

    #[test]
    fn test_extract_json_with_nested_and_strings() {
        let value =
            extract_json(r#"note {"text": "braces } inside", "n": {"deep": true}} tail"#).unwrap();
        assert_eq!(value["n"]["deep"], true);
    }

    #[test]
    fn test_extract_json_skips_unparseable_region() {
        let value = extract_json(r#"{oops} then {"ok": 1}"#).unwrap();
        assert_eq!(value["ok"], 1);
    }

    #[test]
    fn test_extract_json_none_when_absent() {
        assert!(extract_json("no objects here").is_none());
        assert!(extract_json("{unclosed").is_none());
    }

    // ── legacy normalization ──

    #[test]
    fn test_legacy_none_passes() {
        let out = normalize_legacy_json_value(None);
        assert_eq!(out.value, None);
        assert!(!out.should_update);
    }

    #[test]
    fn test_legacy_blank_flags_rewrite() {
        let out = normalize_legacy_json_value(Some("   "));
        assert_eq!(out.value, None);
        assert!(out.should_update);
        assert_eq!(out.reason, Some("blank"));
    }

    #[test]
    fn test_legacy_invalid_json_wrapped() {
        let out = normalize_legacy_json_value(Some("not json"));
        assert_eq!(out.value, Some(json!({"__legacy_text__": "not json"})));
        assert!(out.should_update);
        assert_eq!(out.reason, Some("invalid_json"));
    }

    #[test]
    fn test_legacy_valid_json_untouched() {
        let out = normalize_legacy_json_value(Some(r#"{"k": 1}"#));
        assert_eq!(out.value, None);
        assert!(!out.should_update);
    }
}
