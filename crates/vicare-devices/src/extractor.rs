//! Property extraction from feature records.
//!
//! Paths use dot notation (`value.value`, `temperature.value`) with optional
//! array indexes (`entries[0].value` or `entries.0.value`). A path that does
//! not resolve is not an error: feature payloads routinely omit properties,
//! so a miss simply yields no value.

use serde_json::Value;

/// Deepest path the extractor will follow.
pub const MAX_PATH_DEPTH: usize = 16;

/// Resolve `path` inside `data`.
///
/// Returns `None` for an empty or malformed path, a missing key, an
/// out-of-range index, a path deeper than [`MAX_PATH_DEPTH`], or an explicit
/// `null` leaf.
pub fn extract_by_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed.ends_with('.') {
        return None;
    }
    if trimmed == "$" {
        return Some(data);
    }

    let parts: Vec<&str> = trimmed
        .split('.')
        .map(str::trim)
        .filter(|p| !p.is_empty() && *p != "$")
        .collect();
    if parts.is_empty() || parts.len() > MAX_PATH_DEPTH {
        tracing::trace!(path = %path, "Property path rejected");
        return None;
    }

    let mut current = data;
    for part in parts {
        current = match part.find('[') {
            Some(bracket_start) => {
                let bracket_end = part.find(']')?;
                let key = &part[..bracket_start];
                let index: usize = part.get(bracket_start + 1..bracket_end)?.parse().ok()?;
                let container = if key.is_empty() {
                    current
                } else {
                    current.as_object()?.get(key)?
                };
                container.as_array()?.get(index)?
            }
            None => match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            },
        };
    }

    if current.is_null() { None } else { Some(current) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_value() {
        let props = json!({ "value": { "type": "number", "value": 45.0, "unit": "celsius" } });
        assert_eq!(extract_by_path(&props, "value.value"), Some(&json!(45.0)));
        assert_eq!(extract_by_path(&props, "value.unit"), Some(&json!("celsius")));
    }

    #[test]
    fn test_missing_nesting_yields_none() {
        let props = json!({ "status": { "value": "connected" } });
        assert_eq!(extract_by_path(&props, "value.value"), None);
        assert_eq!(extract_by_path(&props, "status.value.deeper"), None);
    }

    #[test]
    fn test_malformed_paths() {
        let props = json!({ "value": { "value": 1 } });
        assert_eq!(extract_by_path(&props, ""), None);
        assert_eq!(extract_by_path(&props, "value."), None);
        assert_eq!(extract_by_path(&props, "value[x]"), None);
        assert_eq!(extract_by_path(&props, "$"), Some(&props));
    }

    #[test]
    fn test_array_access() {
        let props = json!({ "day": { "value": [3.1, 4.2, 5.3] } });
        assert_eq!(extract_by_path(&props, "day.value[1]"), Some(&json!(4.2)));
        assert_eq!(extract_by_path(&props, "day.value.2"), Some(&json!(5.3)));
        assert_eq!(extract_by_path(&props, "day.value[9]"), None);
    }

    #[test]
    fn test_null_leaf_is_no_value() {
        let props = json!({ "value": { "value": null } });
        assert_eq!(extract_by_path(&props, "value.value"), None);
    }
}
