//! # Dot-Path Projection
//!
//! Field paths are dot-separated segment lists. Each segment looks up an
//! object property, or an array index when the segment is purely numeric.
//! `project` is the read side used by indexes, queries and schema rules;
//! `assign` is the write side used by `$set` updates.

use serde_json::Value;

/// Resolve `path` inside `value`. Returns `None` when any segment is
/// missing or the current node cannot be descended into.
pub fn project<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Set `path` inside `value` to `new`, creating intermediate objects as
/// needed. Numeric segments address array elements; writing past the end of
/// an array pads it with nulls. A scalar in the middle of the path is
/// replaced by an object.
pub fn assign(value: &mut Value, path: &str, new: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    assign_segments(value, &segments, new);
}

fn assign_segments(value: &mut Value, segments: &[&str], new: Value) {
    let (head, rest) = match segments.split_first() {
        Some(split) => split,
        None => {
            *value = new;
            return;
        }
    };

    if let Value::Array(items) = value {
        if let Ok(index) = head.parse::<usize>() {
            if index >= items.len() {
                items.resize(index + 1, Value::Null);
            }
            assign_segments(&mut items[index], rest, new);
            return;
        }
    }

    if !value.is_object() {
        *value = Value::Object(serde_json::Map::new());
    }
    let map = value.as_object_mut().expect("just ensured object");
    let slot = map.entry(head.to_string()).or_insert(Value::Null);
    if rest.is_empty() {
        *slot = new;
    } else {
        assign_segments(slot, rest, new);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_project_nested() {
        let v = json!({"user": {"name": "aiko", "tags": ["a", "b"]}});
        assert_eq!(project(&v, "user.name"), Some(&json!("aiko")));
        assert_eq!(project(&v, "user.tags.1"), Some(&json!("b")));
        assert_eq!(project(&v, "user.missing"), None);
        assert_eq!(project(&v, "user.tags.9"), None);
        assert_eq!(project(&v, "user.name.deeper"), None);
    }

    #[test]
    fn test_assign_creates_intermediates() {
        let mut v = json!({});
        assign(&mut v, "a.b.c", json!(1));
        assert_eq!(v, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn test_assign_array_index() {
        let mut v = json!({"tags": ["x"]});
        assign(&mut v, "tags.2", json!("z"));
        assert_eq!(v, json!({"tags": ["x", null, "z"]}));
    }

    #[test]
    fn test_assign_replaces_scalar_in_path() {
        let mut v = json!({"a": 5});
        assign(&mut v, "a.b", json!(1));
        assert_eq!(v, json!({"a": {"b": 1}}));
    }
}
