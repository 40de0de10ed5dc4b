//! Named store registry.
//!
//! Hosts that juggle several stores register them here once at program
//! start and look them up by name afterwards, instead of stashing handles
//! in globals.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use kiri_core::{Error, Result};

use crate::store::Store;

#[derive(Default)]
pub struct StoreRegistry {
    stores: RwLock<HashMap<String, Arc<Store>>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store under `name`. Names are unique.
    pub fn register(&self, name: impl Into<String>, store: Arc<Store>) -> Result<()> {
        let name = name.into();
        let mut stores = self.stores.write();
        if stores.contains_key(&name) {
            return Err(Error::Configuration {
                message: format!("store '{name}' is already registered"),
            });
        }
        stores.insert(name, store);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Store>> {
        self.stores.read().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Store>> {
        self.stores.write().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiri_core::config::DatabaseConfig;

    #[test]
    fn test_register_and_lookup() {
        let registry = StoreRegistry::new();
        let store = Store::new(DatabaseConfig::default());
        registry.register("main", Arc::clone(&store)).unwrap();

        assert!(registry.get("main").is_some());
        assert!(registry.get("other").is_none());
        assert!(registry.register("main", store).is_err());
        assert_eq!(registry.names(), vec!["main"]);

        assert!(registry.remove("main").is_some());
        assert!(registry.get("main").is_none());
    }
}
