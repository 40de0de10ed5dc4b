//! Index registry and maintenance.
//!
//! The manager owns every registered index and is driven by the store's
//! writer: after each successful write it receives `(key, new_value)` and
//! re-slots the key in all indexes. Index creation over a populated store
//! happens in two phases: a batched build that runs outside the writer
//! lock while concurrent writes accumulate in a delta buffer, and a publish
//! step that folds the buffer in before the index becomes queryable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use kiri_core::{path, Error, Result};

use crate::hash::HashIndex;
use crate::query::{Filter, QueryOp};
use crate::range::RangeIndex;
use crate::text::TextIndex;

/// Kind of secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Hash,
    Range,
    Text,
}

/// Public description of a registered index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub field: String,
    pub kind: IndexKind,
}

enum IndexImpl {
    Hash(HashIndex),
    Range(RangeIndex),
    Text(TextIndex),
}

impl IndexImpl {
    fn new(kind: IndexKind) -> Self {
        match kind {
            IndexKind::Hash => IndexImpl::Hash(HashIndex::new()),
            IndexKind::Range => IndexImpl::Range(RangeIndex::new()),
            IndexKind::Text => IndexImpl::Text(TextIndex::new()),
        }
    }

    fn update(&mut self, key: &str, projected: Option<&Value>) {
        match (self, projected) {
            (IndexImpl::Hash(idx), Some(v)) => idx.insert(key, v),
            (IndexImpl::Hash(idx), None) => idx.remove(key),
            (IndexImpl::Range(idx), Some(v)) => idx.insert(key, v),
            (IndexImpl::Range(idx), None) => idx.remove(key),
            (IndexImpl::Text(idx), Some(v)) => idx.insert(key, v),
            (IndexImpl::Text(idx), None) => idx.remove(key),
        }
    }

    fn clear(&mut self) {
        match self {
            IndexImpl::Hash(idx) => idx.clear(),
            IndexImpl::Range(idx) => idx.clear(),
            IndexImpl::Text(idx) => idx.clear(),
        }
    }
}

struct ActiveIndex {
    kind: IndexKind,
    index: IndexImpl,
}

/// Standalone builder for phase one of index creation.
pub struct IndexBuilder {
    field: String,
    kind: IndexKind,
    index: IndexImpl,
}

impl IndexBuilder {
    pub fn new(field: impl Into<String>, kind: IndexKind) -> Self {
        Self {
            field: field.into(),
            kind,
            index: IndexImpl::new(kind),
        }
    }

    pub fn insert(&mut self, key: &str, value: &Value) {
        let projected = path::project(value, &self.field);
        self.index.update(key, projected);
    }

    pub fn field(&self) -> &str {
        &self.field
    }
}

struct BuildBuffer {
    kind: IndexKind,
    /// `(key, whole new value)` deltas observed while the build ran.
    deltas: Vec<(String, Option<Value>)>,
    /// A `clear` ran mid-build; everything built so far is stale.
    cleared: bool,
}

/// Outcome of asking the manager to serve a filter.
pub enum IndexLookup {
    /// Keys matching the filter, in the index's natural order.
    Keys(Vec<String>),
    /// An index covers the field but cannot serve this operator.
    Unsupported,
    /// No index on this field.
    None,
}

#[derive(Default)]
pub struct IndexManager {
    active: HashMap<String, ActiveIndex>,
    building: HashMap<String, BuildBuffer>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-slot `key` in every index after a write. `value` is the whole new
    /// value (`None` for a delete); projection happens per index field.
    pub fn apply(&mut self, key: &str, value: Option<&Value>) {
        for (field, active) in self.active.iter_mut() {
            let projected = value.and_then(|v| path::project(v, field));
            active.index.update(key, projected);
        }
        for buffer in self.building.values_mut() {
            buffer.deltas.push((key.to_string(), value.cloned()));
        }
    }

    /// Register a pending build. Fails if the field already has an index or
    /// build in flight.
    pub fn begin_build(&mut self, field: &str, kind: IndexKind) -> Result<()> {
        if self.active.contains_key(field) || self.building.contains_key(field) {
            return Err(Error::Configuration {
                message: format!("index on '{field}' already exists"),
            });
        }
        self.building.insert(
            field.to_string(),
            BuildBuffer {
                kind,
                deltas: Vec::new(),
                cleared: false,
            },
        );
        Ok(())
    }

    /// Discard a pending build (cancellation path).
    pub fn abort_build(&mut self, field: &str) {
        self.building.remove(field);
    }

    /// Fold buffered deltas into the built index and make it queryable.
    pub fn publish(&mut self, field: &str, mut builder: IndexBuilder) -> Result<()> {
        let buffer = self.building.remove(field).ok_or_else(|| Error::Internal {
            message: format!("no pending build for '{field}'"),
        })?;
        if buffer.cleared {
            builder.index.clear();
        }
        let delta_count = buffer.deltas.len();
        for (key, value) in buffer.deltas {
            match value {
                Some(value) => builder.insert(&key, &value),
                None => builder.index.update(&key, None),
            }
        }
        debug!(field, deltas = delta_count, "index published");
        self.active.insert(
            field.to_string(),
            ActiveIndex {
                kind: buffer.kind,
                index: builder.index,
            },
        );
        Ok(())
    }

    pub fn drop_index(&mut self, field: &str) -> bool {
        self.active.remove(field).is_some()
    }

    pub fn list(&self) -> Vec<IndexDescriptor> {
        let mut out: Vec<IndexDescriptor> = self
            .active
            .iter()
            .map(|(field, a)| IndexDescriptor {
                field: field.clone(),
                kind: a.kind,
            })
            .collect();
        out.sort_by(|a, b| a.field.cmp(&b.field));
        out
    }

    pub fn contains(&self, field: &str) -> bool {
        self.active.contains_key(field)
    }

    /// Wipe index contents (after `clear`). Registrations survive.
    pub fn clear_contents(&mut self) {
        for active in self.active.values_mut() {
            active.index.clear();
        }
        for buffer in self.building.values_mut() {
            buffer.deltas.clear();
            buffer.cleared = true;
        }
    }

    /// Try to serve `filter` from an index.
    pub fn lookup(&self, filter: &Filter) -> IndexLookup {
        let active = match self.active.get(&filter.field) {
            Some(active) => active,
            None => return IndexLookup::None,
        };
        match (&active.index, filter.op) {
            (IndexImpl::Hash(idx), QueryOp::Eq) => IndexLookup::Keys(idx.eq(&filter.value)),
            (IndexImpl::Hash(idx), QueryOp::Ne) => IndexLookup::Keys(idx.ne(&filter.value)),
            (IndexImpl::Hash(idx), QueryOp::In) => match filter.value.as_array() {
                Some(candidates) => IndexLookup::Keys(idx.any_of(candidates)),
                None => IndexLookup::Keys(Vec::new()),
            },
            (IndexImpl::Range(idx), QueryOp::Gt) => {
                IndexLookup::Keys(idx.greater(&filter.value, false))
            }
            (IndexImpl::Range(idx), QueryOp::Gte) => {
                IndexLookup::Keys(idx.greater(&filter.value, true))
            }
            (IndexImpl::Range(idx), QueryOp::Lt) => {
                IndexLookup::Keys(idx.less(&filter.value, false))
            }
            (IndexImpl::Range(idx), QueryOp::Lte) => {
                IndexLookup::Keys(idx.less(&filter.value, true))
            }
            (IndexImpl::Text(idx), op) => {
                let needle = match filter.value.as_str() {
                    Some(s) => s.to_lowercase(),
                    None => return IndexLookup::Keys(Vec::new()),
                };
                match op {
                    QueryOp::Contains => IndexLookup::Keys(idx.contains(&needle)),
                    QueryOp::StartsWith => IndexLookup::Keys(idx.starts_with(&needle)),
                    QueryOp::EndsWith => IndexLookup::Keys(idx.ends_with(&needle)),
                    _ => IndexLookup::Unsupported,
                }
            }
            _ => IndexLookup::Unsupported,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter(field: &str, op: &str, value: Value) -> Filter {
        Filter::new(field, op, value).unwrap()
    }

    #[test]
    fn test_apply_maintains_indexes() {
        let mut mgr = IndexManager::new();
        mgr.begin_build("age", IndexKind::Range).unwrap();
        mgr.publish("age", IndexBuilder::new("age", IndexKind::Range))
            .unwrap();

        mgr.apply("u1", Some(&json!({"age": 20})));
        mgr.apply("u2", Some(&json!({"age": 30})));
        match mgr.lookup(&filter("age", ">=", json!(25))) {
            IndexLookup::Keys(keys) => assert_eq!(keys, vec!["u2"]),
            _ => panic!("expected index hit"),
        }

        mgr.apply("u2", None);
        match mgr.lookup(&filter("age", ">=", json!(0))) {
            IndexLookup::Keys(keys) => assert_eq!(keys, vec!["u1"]),
            _ => panic!("expected index hit"),
        }
    }

    #[test]
    fn test_build_buffer_folds_in_at_publish() {
        let mut mgr = IndexManager::new();
        mgr.begin_build("name", IndexKind::Hash).unwrap();

        let mut builder = IndexBuilder::new("name", IndexKind::Hash);
        builder.insert("u1", &json!({"name": "aiko"}));

        // concurrent writes while the build runs
        mgr.apply("u2", Some(&json!({"name": "botan"})));
        mgr.apply("u1", None);

        mgr.publish("name", builder).unwrap();
        match mgr.lookup(&filter("name", "=", json!("botan"))) {
            IndexLookup::Keys(keys) => assert_eq!(keys, vec!["u2"]),
            _ => panic!("expected index hit"),
        }
        match mgr.lookup(&filter("name", "=", json!("aiko"))) {
            IndexLookup::Keys(keys) => assert!(keys.is_empty()),
            _ => panic!("expected index hit"),
        }
    }

    #[test]
    fn test_clear_mid_build_discards_stale_entries() {
        let mut mgr = IndexManager::new();
        mgr.begin_build("n", IndexKind::Hash).unwrap();

        let mut builder = IndexBuilder::new("n", IndexKind::Hash);
        builder.insert("a", &json!({"n": 1}));

        // the store was cleared while the build ran, then written again
        mgr.clear_contents();
        mgr.apply("b", Some(&json!({"n": 2})));

        mgr.publish("n", builder).unwrap();
        match mgr.lookup(&filter("n", "=", json!(1))) {
            IndexLookup::Keys(keys) => assert!(keys.is_empty()),
            _ => panic!("expected index hit"),
        }
        match mgr.lookup(&filter("n", "=", json!(2))) {
            IndexLookup::Keys(keys) => assert_eq!(keys, vec!["b"]),
            _ => panic!("expected index hit"),
        }
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let mut mgr = IndexManager::new();
        mgr.begin_build("a", IndexKind::Hash).unwrap();
        assert!(mgr.begin_build("a", IndexKind::Hash).is_err());
        mgr.abort_build("a");
        assert!(mgr.begin_build("a", IndexKind::Hash).is_ok());
    }

    #[test]
    fn test_unsupported_operator() {
        let mut mgr = IndexManager::new();
        mgr.begin_build("name", IndexKind::Hash).unwrap();
        mgr.publish("name", IndexBuilder::new("name", IndexKind::Hash))
            .unwrap();
        assert!(matches!(
            mgr.lookup(&filter("name", ">", json!("a"))),
            IndexLookup::Unsupported
        ));
        assert!(matches!(
            mgr.lookup(&filter("other", "=", json!(1))),
            IndexLookup::None
        ));
    }
}
