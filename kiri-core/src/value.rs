//! # Value Helpers
//!
//! The engine stores arbitrary JSON trees (`serde_json::Value`). This module
//! owns the cross-cutting value concerns: type names, a total ordering used
//! by sorts and range indexes, canonical term encoding for index buckets, and
//! the shallow merge used by collection updates.

use std::cmp::Ordering;

use serde_json::Value;

/// Human-readable type name, matching the collection schema type vocabulary.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Scalars are every value that is not an array or object.
pub fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

/// Numeric view of a value. Only real JSON numbers qualify; no string
/// coercion happens here.
pub fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total ordering over values: null < bool < number < string < array <
/// object. Numbers compare by `total_cmp`, strings lexicographically, arrays
/// element-wise. Objects compare by their serialised form, which is only
/// there to keep the ordering total; sorting keys on object-valued fields is
/// not meaningful.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (ax, bx) in x.iter().zip(y.iter()) {
                match compare(ax, bx) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(_), Value::Object(_)) => {
            let x = a.to_string();
            let y = b.to_string();
            x.cmp(&y)
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Canonical bucket term for a scalar value. The JSON encoding keeps types
/// apart: the number `1` becomes `1` while the string `"1"` becomes `"1"`.
pub fn canonical_term(value: &Value) -> String {
    value.to_string()
}

/// Shallow merge of `patch` into `doc`. Both must be objects for the merge
/// to do anything; top-level fields of `patch` replace fields of `doc`.
pub fn merge(doc: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(source)) = (doc, patch) {
        for (k, v) in source {
            target.insert(k.clone(), v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_names() {
        assert_eq!(type_name(&json!(null)), "null");
        assert_eq!(type_name(&json!(3.5)), "number");
        assert_eq!(type_name(&json!("x")), "string");
        assert_eq!(type_name(&json!([1])), "array");
        assert_eq!(type_name(&json!({"a": 1})), "object");
    }

    #[test]
    fn test_compare_numbers_and_strings() {
        assert_eq!(compare(&json!(1), &json!(2)), Ordering::Less);
        assert_eq!(compare(&json!(2.5), &json!(2.5)), Ordering::Equal);
        assert_eq!(compare(&json!("a"), &json!("b")), Ordering::Less);
        // cross-type: numbers sort before strings
        assert_eq!(compare(&json!(999), &json!("1")), Ordering::Less);
    }

    #[test]
    fn test_canonical_term_keeps_types_apart() {
        assert_ne!(canonical_term(&json!(1)), canonical_term(&json!("1")));
        assert_eq!(canonical_term(&json!(null)), "null");
    }

    #[test]
    fn test_merge_is_shallow() {
        let mut doc = json!({"a": 1, "b": {"x": 1}});
        merge(&mut doc, &json!({"b": {"y": 2}, "c": 3}));
        assert_eq!(doc, json!({"a": 1, "b": {"y": 2}, "c": 3}));
    }
}
