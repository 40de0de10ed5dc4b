//! Tokenised substring index over string values.
//!
//! Strings split on non-word characters and lowercase; each token maps to
//! the set of keys containing it. Membership queries scan the token table,
//! which is O(tokens) and fine at the scale this engine targets.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

#[derive(Debug, Default)]
pub struct TextIndex {
    tokens: HashMap<String, HashSet<String>>,
    keys: HashMap<String, HashSet<String>>,
}

/// Lowercased word tokens of `text`. Word characters are alphanumerics and
/// underscore, everything else separates.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

impl TextIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `key` under the tokens of the projected string. Non-string
    /// values are skipped.
    pub fn insert(&mut self, key: &str, projected: &Value) {
        let text = match projected.as_str() {
            Some(text) => text,
            None => {
                self.remove(key);
                return;
            }
        };
        self.remove(key);
        let tokens = tokenize(text);
        for token in &tokens {
            self.tokens
                .entry(token.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.keys.insert(key.to_string(), tokens);
    }

    pub fn remove(&mut self, key: &str) {
        if let Some(tokens) = self.keys.remove(key) {
            for token in tokens {
                if let Some(bucket) = self.tokens.get_mut(&token) {
                    bucket.remove(key);
                    if bucket.is_empty() {
                        self.tokens.remove(&token);
                    }
                }
            }
        }
    }

    pub fn contains(&self, needle: &str) -> Vec<String> {
        self.matching(|token| token.contains(needle))
    }

    pub fn starts_with(&self, needle: &str) -> Vec<String> {
        self.matching(|token| token.starts_with(needle))
    }

    pub fn ends_with(&self, needle: &str) -> Vec<String> {
        self.matching(|token| token.ends_with(needle))
    }

    fn matching(&self, pred: impl Fn(&str) -> bool) -> Vec<String> {
        let mut out: HashSet<String> = HashSet::new();
        for (token, keys) in &self.tokens {
            if pred(token) {
                out.extend(keys.iter().cloned());
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
        self.tokens.clear();
        self.keys.clear();
    }
}
