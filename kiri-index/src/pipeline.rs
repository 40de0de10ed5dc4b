//! Result pipeline.
//!
//! A query produces an eager, in-memory sequence of `(key, value)` rows that
//! supports chainable shaping (sort/limit/skip/filter/map) and the numeric
//! aggregations. Sorting is stable; non-numeric values are skipped by the
//! numeric aggregates. Tuned for working sets up to ~10^5 rows.

use std::collections::HashMap;

use serde_json::Value;

use kiri_core::{path, value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "desc" | "descending" => SortDirection::Desc,
            _ => SortDirection::Asc,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    rows: Vec<(String, Value)>,
}

impl ResultSet {
    pub fn new(rows: Vec<(String, Value)>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[(String, Value)] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<(String, Value)> {
        self.rows
    }

    pub fn keys(&self) -> Vec<String> {
        self.rows.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.rows.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Stable sort by the value at `field`. Rows missing the field sort
    /// after everything else regardless of direction.
    pub fn sort(mut self, field: &str, direction: SortDirection) -> Self {
        self.rows.sort_by(|(_, a), (_, b)| {
            let av = path::project(a, field);
            let bv = path::project(b, field);
            match (av, bv) {
                (Some(av), Some(bv)) => {
                    let ord = value::compare(av, bv);
                    match direction {
                        SortDirection::Asc => ord,
                        SortDirection::Desc => ord.reverse(),
                    }
                }
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        });
        self
    }

    /// Stable sort with a caller-supplied comparator over values.
    pub fn sort_by<F>(mut self, mut compare: F) -> Self
    where
        F: FnMut(&Value, &Value) -> std::cmp::Ordering,
    {
        self.rows.sort_by(|(_, a), (_, b)| compare(a, b));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.rows.truncate(n);
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        if n >= self.rows.len() {
            self.rows.clear();
        } else {
            self.rows.drain(..n);
        }
        self
    }

    pub fn first(&self) -> Option<&Value> {
        self.rows.first().map(|(_, v)| v)
    }

    pub fn last(&self) -> Option<&Value> {
        self.rows.last().map(|(_, v)| v)
    }

    pub fn filter<F>(mut self, pred: F) -> Self
    where
        F: Fn(&Value) -> bool,
    {
        self.rows.retain(|(_, v)| pred(v));
        self
    }

    pub fn map<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Value,
    {
        for (_, v) in self.rows.iter_mut() {
            let taken = std::mem::take(v);
            *v = f(taken);
        }
        self
    }

    // ---- aggregations ----

    fn numbers_at<'a>(&'a self, field: &'a str) -> impl Iterator<Item = f64> + 'a {
        self.rows
            .iter()
            .filter_map(move |(_, v)| path::project(v, field).and_then(value::as_f64))
    }

    pub fn sum(&self, field: &str) -> f64 {
        self.numbers_at(field).sum()
    }

    pub fn avg(&self, field: &str) -> Option<f64> {
        let mut count = 0u64;
        let mut total = 0.0;
        for n in self.numbers_at(field) {
            count += 1;
            total += n;
        }
        if count == 0 {
            None
        } else {
            Some(total / count as f64)
        }
    }

    pub fn min(&self, field: &str) -> Option<f64> {
        self.numbers_at(field).reduce(f64::min)
    }

    pub fn max(&self, field: &str) -> Option<f64> {
        self.numbers_at(field).reduce(f64::max)
    }

    /// Group rows by the canonical term of the value at `field`. Rows
    /// without the field are skipped.
    pub fn group_by(&self, field: &str) -> HashMap<String, ResultSet> {
        let mut groups: HashMap<String, ResultSet> = HashMap::new();
        for (k, v) in &self.rows {
            if let Some(term) = path::project(v, field).map(value::canonical_term) {
                groups
                    .entry(term)
                    .or_default()
                    .rows
                    .push((k.clone(), v.clone()));
            }
        }
        groups
    }
}

impl IntoIterator for ResultSet {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}
