//! Equality index: canonical scalar term -> set of store keys.
//!
//! Terms use the JSON encoding of the value, which keeps types apart (the
//! number `1` and the string `"1"` land in different buckets) and gives null
//! its own bucket. Arrays and objects are not hashable terms and are
//! silently skipped.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use kiri_core::value;

#[derive(Debug, Default)]
pub struct HashIndex {
    buckets: HashMap<String, HashSet<String>>,
    /// Reverse map so removal never scans buckets.
    keys: HashMap<String, String>,
}

impl HashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `key` under the projected value. Non-scalar values are skipped.
    pub fn insert(&mut self, key: &str, projected: &Value) {
        if !value::is_scalar(projected) {
            return;
        }
        self.remove(key);
        let term = value::canonical_term(projected);
        self.buckets
            .entry(term.clone())
            .or_default()
            .insert(key.to_string());
        self.keys.insert(key.to_string(), term);
    }

    /// Remove `key` from whatever bucket holds it.
    pub fn remove(&mut self, key: &str) {
        if let Some(term) = self.keys.remove(key) {
            if let Some(bucket) = self.buckets.get_mut(&term) {
                bucket.remove(key);
                if bucket.is_empty() {
                    self.buckets.remove(&term);
                }
            }
        }
    }

    /// Keys whose term equals `target`.
    pub fn eq(&self, target: &Value) -> Vec<String> {
        let term = value::canonical_term(target);
        self.buckets
            .get(&term)
            .map(|b| {
                let mut keys: Vec<String> = b.iter().cloned().collect();
                keys.sort();
                keys
            })
            .unwrap_or_default()
    }

    /// Indexed keys whose term differs from `target`. Keys whose value was
    /// never indexed (non-scalar, missing field) are not covered; the caller
    /// falls back to a scan when that matters.
    pub fn ne(&self, target: &Value) -> Vec<String> {
        let term = value::canonical_term(target);
        let mut keys: Vec<String> = self
            .keys
            .iter()
            .filter(|(_, t)| **t != term)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Keys whose term equals any of `targets`.
    pub fn any_of(&self, targets: &[Value]) -> Vec<String> {
        let mut out: HashSet<String> = HashSet::new();
        for target in targets {
            if let Some(bucket) = self.buckets.get(&value::canonical_term(target)) {
                out.extend(bucket.iter().cloned());
            }
        }
        let mut keys: Vec<String> = out.into_iter().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_eq_and_type_separation() {
        let mut idx = HashIndex::new();
        idx.insert("a", &json!(1));
        idx.insert("b", &json!("1"));
        idx.insert("c", &json!(1));

        assert_eq!(idx.eq(&json!(1)), vec!["a", "c"]);
        assert_eq!(idx.eq(&json!("1")), vec!["b"]);
    }

    #[test]
    fn test_null_has_its_own_bucket() {
        let mut idx = HashIndex::new();
        idx.insert("a", &json!(null));
        idx.insert("b", &json!(0));
        assert_eq!(idx.eq(&json!(null)), vec!["a"]);
    }

    #[test]
    fn test_update_moves_key() {
        let mut idx = HashIndex::new();
        idx.insert("a", &json!("red"));
        idx.insert("a", &json!("blue"));
        assert!(idx.eq(&json!("red")).is_empty());
        assert_eq!(idx.eq(&json!("blue")), vec!["a"]);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn test_ne_and_any_of() {
        let mut idx = HashIndex::new();
        idx.insert("a", &json!("x"));
        idx.insert("b", &json!("y"));
        idx.insert("c", &json!("z"));

        assert_eq!(idx.ne(&json!("y")), vec!["a", "c"]);
        assert_eq!(idx.any_of(&[json!("x"), json!("z")]), vec!["a", "c"]);
    }

    #[test]
    fn test_non_scalars_are_skipped() {
        let mut idx = HashIndex::new();
        idx.insert("a", &json!([1, 2]));
        idx.insert("b", &json!({"x": 1}));
        assert!(idx.is_empty());
    }
}
