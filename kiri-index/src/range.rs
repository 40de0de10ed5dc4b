//! Ordered index over numbers and strings.
//!
//! Keeps a sorted sequence of `(term, key)` pairs; boundary positions are
//! found by binary search, so range queries cost O(log n + matches) and
//! results come back in ascending term order. Values of other types are
//! silently skipped and stay reachable through full scans.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::Value;

/// A range-indexable term. Numbers order before strings so each query,
/// which is typed by its operand, can bound its scan to one variant.
#[derive(Debug, Clone)]
pub enum RangeTerm {
    Num(f64),
    Str(String),
}

impl RangeTerm {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(RangeTerm::Num),
            Value::String(s) => Some(RangeTerm::Str(s.clone())),
            _ => None,
        }
    }

    fn same_variant(&self, other: &RangeTerm) -> bool {
        matches!(
            (self, other),
            (RangeTerm::Num(_), RangeTerm::Num(_)) | (RangeTerm::Str(_), RangeTerm::Str(_))
        )
    }
}

impl PartialEq for RangeTerm {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RangeTerm {}

impl PartialOrd for RangeTerm {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RangeTerm {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (RangeTerm::Num(a), RangeTerm::Num(b)) => a.total_cmp(b),
            (RangeTerm::Str(a), RangeTerm::Str(b)) => a.cmp(b),
            (RangeTerm::Num(_), RangeTerm::Str(_)) => Ordering::Less,
            (RangeTerm::Str(_), RangeTerm::Num(_)) => Ordering::Greater,
        }
    }
}

#[derive(Debug, Default)]
pub struct RangeIndex {
    /// Sorted by (term, key).
    entries: Vec<(RangeTerm, String)>,
    /// Reverse map for O(log n) removal.
    keys: HashMap<String, RangeTerm>,
}

impl RangeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, projected: &Value) {
        let term = match RangeTerm::from_value(projected) {
            Some(term) => term,
            None => {
                // type-incompatible: make sure a previous compatible value
                // for this key is gone
                self.remove(key);
                return;
            }
        };
        self.remove(key);
        let pos = self
            .entries
            .partition_point(|(t, k)| (t, k.as_str()) < (&term, key));
        self.entries.insert(pos, (term.clone(), key.to_string()));
        self.keys.insert(key.to_string(), term);
    }

    pub fn remove(&mut self, key: &str) {
        if let Some(term) = self.keys.remove(key) {
            let start = self.entries.partition_point(|(t, _)| t < &term);
            for i in start..self.entries.len() {
                if self.entries[i].0 != term {
                    break;
                }
                if self.entries[i].1 == key {
                    self.entries.remove(i);
                    return;
                }
            }
        }
    }

    /// Keys with term strictly greater than `bound`, ascending.
    pub fn greater(&self, bound: &Value, inclusive: bool) -> Vec<String> {
        let bound = match RangeTerm::from_value(bound) {
            Some(b) => b,
            None => return Vec::new(),
        };
        let start = if inclusive {
            self.entries.partition_point(|(t, _)| t < &bound)
        } else {
            self.entries.partition_point(|(t, _)| t <= &bound)
        };
        self.entries[start..]
            .iter()
            .take_while(|(t, _)| t.same_variant(&bound))
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Keys with term strictly less than `bound`, ascending.
    pub fn less(&self, bound: &Value, inclusive: bool) -> Vec<String> {
        let bound = match RangeTerm::from_value(bound) {
            Some(b) => b,
            None => return Vec::new(),
        };
        let end = if inclusive {
            self.entries.partition_point(|(t, _)| t <= &bound)
        } else {
            self.entries.partition_point(|(t, _)| t < &bound)
        };
        self.entries[..end]
            .iter()
            .filter(|(t, _)| t.same_variant(&bound))
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ages() -> RangeIndex {
        let mut idx = RangeIndex::new();
        idx.insert("u1", &json!(20));
        idx.insert("u2", &json!(25));
        idx.insert("u3", &json!(30));
        idx.insert("u4", &json!(35));
        idx
    }

    #[test]
    fn test_boundaries() {
        let idx = ages();
        assert_eq!(idx.greater(&json!(25), true), vec!["u2", "u3", "u4"]);
        assert_eq!(idx.greater(&json!(25), false), vec!["u3", "u4"]);
        assert_eq!(idx.less(&json!(30), true), vec!["u1", "u2", "u3"]);
        assert_eq!(idx.less(&json!(30), false), vec!["u1", "u2"]);
    }

    #[test]
    fn test_ascending_order_with_duplicates() {
        let mut idx = ages();
        idx.insert("u5", &json!(25));
        let keys = idx.greater(&json!(20), false);
        assert_eq!(keys, vec!["u2", "u5", "u3", "u4"]);
    }

    #[test]
    fn test_update_reorders() {
        let mut idx = ages();
        idx.insert("u1", &json!(40));
        assert_eq!(idx.greater(&json!(35), false), vec!["u1"]);
        assert_eq!(idx.len(), 4);
    }

    #[test]
    fn test_string_queries_ignore_numbers() {
        let mut idx = RangeIndex::new();
        idx.insert("a", &json!("apple"));
        idx.insert("b", &json!("banana"));
        idx.insert("n", &json!(5));

        assert_eq!(idx.greater(&json!("apple"), false), vec!["b"]);
        assert_eq!(idx.less(&json!("zzz"), false), vec!["a", "b"]);
        // numeric query never sees strings
        assert_eq!(idx.greater(&json!(0), false), vec!["n"]);
    }

    #[test]
    fn test_incompatible_value_drops_key() {
        let mut idx = ages();
        idx.insert("u1", &json!({"nested": true}));
        assert_eq!(idx.len(), 3);
        assert_eq!(idx.greater(&json!(0), false), vec!["u2", "u3", "u4"]);
    }
}
