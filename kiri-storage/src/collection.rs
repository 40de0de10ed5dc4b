//! Collections: a namespaced document model over the store.
//!
//! A collection views every key of the form `<name>::<id>`. Ids are
//! process-monotonic, seeded from the highest existing id in the namespace
//! so a restart can never hand one out twice, and every stored document
//! carries its own key in `_id`. Queries support scalar equality plus the
//! `$gt/$gte/$lt/$lte/$ne/$in` operators, ANDed per field. An optional
//! schema validates documents before anything reaches the store, so a
//! failed insert or update leaves no partial state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;

use kiri_core::{path, value, Error, Result};
use kiri_index::ResultSet;

use crate::store::Store;

/// Separator between a collection name and the document id.
pub(crate) const NAMESPACE_SEP: &str = "::";

// ========== Schema ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (FieldType::String, Value::String(_))
                | (FieldType::Number, Value::Number(_))
                | (FieldType::Boolean, Value::Bool(_))
                | (FieldType::Array, Value::Array(_))
                | (FieldType::Object, Value::Object(_))
        )
    }

    fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }
}

/// Per-field validation rule. `min`/`max` bound the numeric value for
/// numbers and the length for strings and arrays.
#[derive(Debug, Clone, Default)]
pub struct FieldRule {
    pub field_type: Option<FieldType>,
    pub required: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub allowed: Option<Vec<Value>>,
    pub pattern: Option<Regex>,
}

impl FieldRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_type(mut self, field_type: FieldType) -> Self {
        self.field_type = Some(field_type);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn one_of(mut self, allowed: Vec<Value>) -> Self {
        self.allowed = Some(allowed);
        self
    }

    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    rules: Vec<(String, FieldRule)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, rule: FieldRule) -> Self {
        self.rules.push((name.into(), rule));
        self
    }

    pub fn validate(&self, doc: &Value) -> Result<()> {
        for (field, rule) in &self.rules {
            let actual = path::project(doc, field);
            let actual = match actual {
                Some(actual) => actual,
                None => {
                    if rule.required {
                        return Err(validation(field, "is required"));
                    }
                    continue;
                }
            };

            if let Some(expected) = rule.field_type {
                if !expected.accepts(actual) {
                    return Err(validation(
                        field,
                        &format!(
                            "must be {} (got {})",
                            expected.name(),
                            value::type_name(actual)
                        ),
                    ));
                }
            }

            let measure = match actual {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => Some(s.chars().count() as f64),
                Value::Array(items) => Some(items.len() as f64),
                _ => None,
            };
            if let (Some(min), Some(measured)) = (rule.min, measure) {
                if measured < min {
                    return Err(validation(field, &format!("is below the minimum of {min}")));
                }
            }
            if let (Some(max), Some(measured)) = (rule.max, measure) {
                if measured > max {
                    return Err(validation(field, &format!("exceeds the maximum of {max}")));
                }
            }

            if let Some(allowed) = &rule.allowed {
                if !allowed.contains(actual) {
                    return Err(validation(field, "is not one of the allowed values"));
                }
            }

            if let (Some(pattern), Some(text)) = (&rule.pattern, actual.as_str()) {
                if !pattern.is_match(text) {
                    return Err(validation(
                        field,
                        &format!("does not match pattern {}", pattern.as_str()),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn validation(field: &str, what: &str) -> Error {
    Error::Validation {
        message: format!("field '{field}' {what}"),
    }
}

// ========== Query match ==========

/// Mongo-style document match: each field condition is either a scalar
/// (whole-value equality) or an operator object whose clauses are ANDed.
pub fn doc_matches(doc: &Value, query: &Value) -> bool {
    let conditions = match query.as_object() {
        Some(conditions) => conditions,
        None => return false,
    };
    conditions.iter().all(|(field, condition)| {
        let actual = path::project(doc, field);
        field_matches(actual, condition)
    })
}

fn field_matches(actual: Option<&Value>, condition: &Value) -> bool {
    if let Some(ops) = condition.as_object() {
        if ops.keys().any(|k| k.starts_with('$')) {
            return ops.iter().all(|(op, operand)| op_matches(actual, op, operand));
        }
    }
    actual == Some(condition)
}

fn op_matches(actual: Option<&Value>, op: &str, operand: &Value) -> bool {
    match op {
        "$ne" => actual != Some(operand),
        "$in" => match (operand, actual) {
            (Value::Array(candidates), Some(actual)) => candidates.contains(actual),
            _ => false,
        },
        "$gt" | "$gte" | "$lt" | "$lte" => {
            let actual = match actual {
                Some(actual) => actual,
                None => return false,
            };
            let compatible = (actual.is_number() && operand.is_number())
                || (actual.is_string() && operand.is_string());
            if !compatible {
                return false;
            }
            let ord = value::compare(actual, operand);
            match op {
                "$gt" => ord.is_gt(),
                "$gte" => ord.is_ge(),
                "$lt" => ord.is_lt(),
                "$lte" => ord.is_le(),
                _ => unreachable!(),
            }
        }
        _ => false,
    }
}

// ========== Collection ==========

pub(crate) struct CollectionCore {
    next_id: AtomicU64,
    schema: RwLock<Option<Schema>>,
}

impl CollectionCore {
    pub(crate) fn new(next_id: u64) -> Self {
        Self {
            next_id: AtomicU64::new(next_id),
            schema: RwLock::new(None),
        }
    }
}

pub struct Collection {
    store: Arc<Store>,
    name: String,
    core: Arc<CollectionCore>,
}

impl Collection {
    pub(crate) fn new(store: Arc<Store>, name: String, core: Arc<CollectionCore>) -> Self {
        Self { store, name, core }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn prefix(&self) -> String {
        format!("{}{NAMESPACE_SEP}", self.name)
    }

    /// Install (or replace) the validation schema. Applies to subsequent
    /// inserts and updates.
    pub fn schema(&self, schema: Schema) {
        *self.core.schema.write() = Some(schema);
    }

    fn validate(&self, doc: &Value) -> Result<()> {
        if let Some(schema) = self.core.schema.read().as_ref() {
            schema.validate(doc)?;
        }
        Ok(())
    }

    /// Documents of this collection sorted by ascending id.
    fn documents(&self) -> Result<Vec<(String, Value)>> {
        let prefix = self.prefix();
        let mut rows = self.store.namespace_rows(&prefix);
        rows.sort_by_key(|(k, _)| {
            k.strip_prefix(&prefix)
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(u64::MAX)
        });
        Ok(rows)
    }

    fn matches_of(&self, query: &Value) -> Result<Vec<(String, Value)>> {
        Ok(self
            .documents()?
            .into_iter()
            .filter(|(_, doc)| doc_matches(doc, query))
            .collect())
    }

    /// Insert one document. Returns the stored document, `_id` included.
    pub async fn insert(&self, doc: Value) -> Result<Value> {
        let mut doc = match doc {
            Value::Object(_) => doc,
            other => {
                return Err(Error::Validation {
                    message: format!(
                        "documents must be objects, got {}",
                        value::type_name(&other)
                    ),
                })
            }
        };
        self.validate(&doc)?;

        let id = self.core.next_id.fetch_add(1, Ordering::SeqCst);
        let key = format!("{}{NAMESPACE_SEP}{id}", self.name);
        path::assign(&mut doc, "_id", Value::String(key.clone()));
        self.store.set(&key, doc.clone()).await?;
        Ok(doc)
    }

    /// Insert a batch. Every document is validated before the first write,
    /// so a bad one aborts the whole batch with no partial state.
    pub async fn insert_many(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        for doc in &docs {
            if !doc.is_object() {
                return Err(Error::Validation {
                    message: "documents must be objects".to_string(),
                });
            }
            self.validate(doc)?;
        }
        let mut inserted = Vec::with_capacity(docs.len());
        for doc in docs {
            inserted.push(self.insert(doc).await?);
        }
        Ok(inserted)
    }

    pub fn find(&self, query: &Value) -> Result<ResultSet> {
        Ok(ResultSet::new(self.matches_of(query)?))
    }

    pub fn find_one(&self, query: &Value) -> Result<Option<Value>> {
        Ok(self.matches_of(query)?.into_iter().next().map(|(_, doc)| doc))
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.documents()?.len())
    }

    /// Update the first matching document. `{$set: {..}}` assigns dot
    /// paths; any other object shallow-merges into the document. Returns
    /// whether a document was updated.
    pub async fn update(&self, query: &Value, changes: &Value) -> Result<bool> {
        let first = self.matches_of(query)?.into_iter().next();
        match first {
            Some((key, doc)) => {
                let updated = self.build_update(&key, &doc, changes)?;
                self.store.set(&key, updated).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Update every matching document. All results are validated before
    /// the first write. Returns the number updated.
    pub async fn update_many(&self, query: &Value, changes: &Value) -> Result<usize> {
        let matches = self.matches_of(query)?;
        let mut staged = Vec::with_capacity(matches.len());
        for (key, doc) in matches {
            let updated = self.build_update(&key, &doc, changes)?;
            staged.push((key, updated));
        }
        let count = staged.len();
        for (key, updated) in staged {
            self.store.set(&key, updated).await?;
        }
        Ok(count)
    }

    fn build_update(&self, key: &str, doc: &Value, changes: &Value) -> Result<Value> {
        let mut updated = doc.clone();
        let set_clause = changes.as_object().and_then(|obj| obj.get("$set"));
        match set_clause {
            Some(set) => {
                if let Some(fields) = set.as_object() {
                    for (field_path, new_value) in fields {
                        path::assign(&mut updated, field_path, new_value.clone());
                    }
                }
            }
            None => value::merge(&mut updated, changes),
        }
        // identity is never writable
        path::assign(&mut updated, "_id", Value::String(key.to_string()));
        self.validate(&updated)?;
        Ok(updated)
    }

    /// Remove the first matching document.
    pub async fn remove(&self, query: &Value) -> Result<bool> {
        match self.matches_of(query)?.into_iter().next() {
            Some((key, _)) => self.store.delete(&key).await,
            None => Ok(false),
        }
    }

    /// Remove every matching document. Returns the number removed.
    pub async fn remove_many(&self, query: &Value) -> Result<usize> {
        let matches = self.matches_of(query)?;
        let mut removed = 0;
        for (key, _) in matches {
            if self.store.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Delete the whole namespace. The id counter keeps counting so ids
    /// are never reused within the process.
    pub async fn drop(&self) -> Result<usize> {
        let docs = self.documents()?;
        let mut removed = 0;
        for (key, _) in docs {
            if self.store.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
