//! Repair pass for structured-output parse failures.
//!
//! Models wrapped in markdown code fences, emit snake_case when the schema
//! asked for camelCase, or alias a field under a close-but-wrong name often
//! enough that a first-parse failure shouldn't be fatal. This module applies
//! a small chain of textual/structural fixups and retries the parse once.

use serde_json::Value;

/// Strip a leading/trailing markdown code fence (` ```json ... ``` ` or ` ``` ... ``` `).
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```JSON"))
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

/// Convert a snake_case key to camelCase.
fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for ch in key.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Recursively rewrite snake_case object keys to camelCase.
pub fn camelize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(snake_to_camel(&k), camelize_keys(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(camelize_keys).collect()),
        other => other,
    }
}

/// Apply field aliases: if `schema_field` is absent but one of `aliases` is
/// present, copy the aliased value over.
pub fn apply_aliases(mut value: Value, aliases: &[(&str, &str)]) -> Value {
    if let Value::Object(ref mut map) = value {
        for (schema_field, alias) in aliases {
            if !map.contains_key(*schema_field) {
                if let Some(aliased) = map.get(*alias).cloned() {
                    map.insert((*schema_field).to_string(), aliased);
                }
            }
        }
    }
    value
}

/// Attempt to parse `raw` as JSON, falling back to fence-stripping and
/// key-camelization if the first attempt fails.
pub fn repair_and_parse(raw: &str) -> Result<Value, serde_json::Error> {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return Ok(value);
    }

    let stripped = strip_code_fence(raw);
    match serde_json::from_str::<Value>(stripped) {
        Ok(value) => Ok(camelize_keys(value)),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fence() {
        let text = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fence(text), "{\"a\": 1}");
    }

    #[test]
    fn strips_bare_fence() {
        let text = "```\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fence(text), "{\"a\": 1}");
    }

    #[test]
    fn leaves_unfenced_text_alone() {
        let text = "{\"a\": 1}";
        assert_eq!(strip_code_fence(text), "{\"a\": 1}");
    }

    #[test]
    fn camelizes_nested_keys() {
        let value = serde_json::json!({"boundary_type": "new_topic", "nested": {"trigger_message_id": "x"}});
        let camelized = camelize_keys(value);
        assert_eq!(camelized["boundaryType"], "new_topic");
        assert_eq!(camelized["nested"]["triggerMessageId"], "x");
    }

    #[test]
    fn applies_alias_when_field_missing() {
        let value = serde_json::json!({"name": "Planning Channel"});
        let result = apply_aliases(value, &[("displayName", "name")]);
        assert_eq!(result["displayName"], "Planning Channel");
    }

    #[test]
    fn alias_does_not_override_existing_field() {
        let value = serde_json::json!({"displayName": "Real", "name": "Alias"});
        let result = apply_aliases(value, &[("displayName", "name")]);
        assert_eq!(result["displayName"], "Real");
    }

    #[test]
    fn repairs_fenced_snake_case_payload() {
        let raw = "```json\n{\"should_search\": true}\n```";
        let parsed = repair_and_parse(raw).unwrap();
        assert_eq!(parsed["shouldSearch"], true);
    }

    #[test]
    fn first_attempt_parses_clean_json_without_repair() {
        let raw = "{\"shouldSearch\": false}";
        let parsed = repair_and_parse(raw).unwrap();
        assert_eq!(parsed["shouldSearch"], false);
    }
}
