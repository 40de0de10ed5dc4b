//! Tagged query AST and predicate compilation.
//!
//! `query(field, op, value)` produces a [`Filter`], a small structure the
//! executor inspects to choose between an index lookup and a scan, instead
//! of side-channel metadata on a closure. Compiled scan predicates are kept
//! in a bounded LRU cache keyed by `field|op|value`.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use kiri_core::{path, value, Error, Result};

use crate::text;

/// Comparison operators accepted by `query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Contains,
    StartsWith,
    EndsWith,
}

impl QueryOp {
    /// Parse the operator spellings accepted at the API boundary.
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "=" | "==" => Some(QueryOp::Eq),
            "!=" | "<>" => Some(QueryOp::Ne),
            ">" => Some(QueryOp::Gt),
            ">=" => Some(QueryOp::Gte),
            "<" => Some(QueryOp::Lt),
            "<=" => Some(QueryOp::Lte),
            _ => match op.to_ascii_lowercase().replace('_', "").as_str() {
                "in" => Some(QueryOp::In),
                "contains" => Some(QueryOp::Contains),
                "startswith" => Some(QueryOp::StartsWith),
                "endswith" => Some(QueryOp::EndsWith),
                _ => None,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryOp::Eq => "=",
            QueryOp::Ne => "!=",
            QueryOp::Gt => ">",
            QueryOp::Gte => ">=",
            QueryOp::Lt => "<",
            QueryOp::Lte => "<=",
            QueryOp::In => "in",
            QueryOp::Contains => "contains",
            QueryOp::StartsWith => "startsWith",
            QueryOp::EndsWith => "endsWith",
        }
    }
}

/// One field comparison: the tagged AST behind `query(field, op, value)`.
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: QueryOp,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: &str, value: Value) -> Result<Self> {
        let op = QueryOp::parse(op).ok_or_else(|| Error::Validation {
            message: format!("unknown query operator: {op}"),
        })?;
        Ok(Self {
            field: field.into(),
            op,
            value,
        })
    }

    /// Cache key for the compiled-predicate cache.
    pub fn cache_key(&self) -> String {
        format!("{}|{}|{}", self.field, self.op.as_str(), self.value)
    }

    /// Evaluate against one stored value. This is the scan-path semantics;
    /// the index paths agree with it by construction.
    pub fn matches(&self, doc: &Value) -> bool {
        let actual = path::project(doc, &self.field);
        match self.op {
            QueryOp::Eq => actual == Some(&self.value),
            // `!=` requires the field to be present, matching what the hash
            // index can answer.
            QueryOp::Ne => matches!(actual, Some(a) if a != &self.value),
            QueryOp::Gt | QueryOp::Gte | QueryOp::Lt | QueryOp::Lte => {
                let actual = match actual {
                    Some(actual) => actual,
                    None => return false,
                };
                if !comparable(actual, &self.value) {
                    return false;
                }
                let ord = value::compare(actual, &self.value);
                match self.op {
                    QueryOp::Gt => ord.is_gt(),
                    QueryOp::Gte => ord.is_ge(),
                    QueryOp::Lt => ord.is_lt(),
                    QueryOp::Lte => ord.is_le(),
                    _ => unreachable!(),
                }
            }
            QueryOp::In => match (&self.value, actual) {
                (Value::Array(candidates), Some(actual)) => candidates.contains(actual),
                _ => false,
            },
            QueryOp::Contains | QueryOp::StartsWith | QueryOp::EndsWith => {
                let haystack = match actual.and_then(|v| v.as_str()) {
                    Some(s) => s,
                    None => return false,
                };
                let needle = match self.value.as_str() {
                    Some(s) => s.to_lowercase(),
                    None => return false,
                };
                let tokens = text::tokenize(haystack);
                match self.op {
                    QueryOp::Contains => tokens.iter().any(|t| t.contains(&needle)),
                    QueryOp::StartsWith => tokens.iter().any(|t| t.starts_with(&needle)),
                    QueryOp::EndsWith => tokens.iter().any(|t| t.ends_with(&needle)),
                    _ => unreachable!(),
                }
            }
        }
    }
}

fn comparable(a: &Value, b: &Value) -> bool {
    (a.is_number() && b.is_number()) || (a.is_string() && b.is_string())
}

pub type CompiledPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Bounded cache of compiled scan predicates.
pub struct PredicateCache {
    cache: Mutex<LruCache<String, CompiledPredicate>>,
}

impl PredicateCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get_or_compile(&self, filter: &Filter) -> CompiledPredicate {
        let key = filter.cache_key();
        let mut cache = self.cache.lock();
        if let Some(pred) = cache.get(&key) {
            return Arc::clone(pred);
        }
        let owned = filter.clone();
        let pred: CompiledPredicate = Arc::new(move |doc| owned.matches(doc));
        cache.push(key, Arc::clone(&pred));
        pred
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
