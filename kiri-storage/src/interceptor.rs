//! Interceptor chain.
//!
//! Reads and writes traverse a linear pipeline of typed middlewares that
//! can transform the value or veto the operation: the composition point
//! for concerns like cipher framing or stamping, without touching the
//! engine. `before_write` runs before anything reaches the WAL; a veto
//! leaves no trace.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use kiri_core::traits::{ReadInterceptor, WriteInterceptor};
use kiri_core::Result;

#[derive(Default)]
pub struct InterceptorChain {
    writes: RwLock<Vec<Arc<dyn WriteInterceptor>>>,
    reads: RwLock<Vec<Arc<dyn ReadInterceptor>>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_write(&self, interceptor: Arc<dyn WriteInterceptor>) {
        self.writes.write().push(interceptor);
    }

    pub fn add_read(&self, interceptor: Arc<dyn ReadInterceptor>) {
        self.reads.write().push(interceptor);
    }

    pub fn before_write(&self, key: &str, mut value: Value) -> Result<Value> {
        for interceptor in self.writes.read().iter() {
            value = interceptor.before_write(key, value)?;
        }
        Ok(value)
    }

    pub fn after_write(&self, key: &str, value: &Value) {
        for interceptor in self.writes.read().iter() {
            interceptor.after_write(key, value);
        }
    }

    pub fn before_read(&self, key: &str) -> Result<()> {
        for interceptor in self.reads.read().iter() {
            interceptor.before_read(key)?;
        }
        Ok(())
    }

    pub fn after_read(&self, key: &str, mut value: Value) -> Value {
        for interceptor in self.reads.read().iter() {
            value = interceptor.after_read(key, value);
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiri_core::Error;
    use serde_json::json;

    struct Stamper;

    impl WriteInterceptor for Stamper {
        fn before_write(&self, _key: &str, mut value: Value) -> Result<Value> {
            if let Some(obj) = value.as_object_mut() {
                obj.insert("stamped".to_string(), json!(true));
            }
            Ok(value)
        }
    }

    struct RejectSecrets;

    impl WriteInterceptor for RejectSecrets {
        fn before_write(&self, key: &str, value: Value) -> Result<Value> {
            if key.starts_with("secret:") {
                return Err(Error::Validation {
                    message: "secrets are not accepted here".to_string(),
                });
            }
            Ok(value)
        }
    }

    #[test]
    fn test_chain_transforms_in_order() {
        let chain = InterceptorChain::new();
        chain.add_write(Arc::new(Stamper));

        let out = chain.before_write("k", json!({"a": 1})).unwrap();
        assert_eq!(out, json!({"a": 1, "stamped": true}));
    }

    #[test]
    fn test_chain_can_veto() {
        let chain = InterceptorChain::new();
        chain.add_write(Arc::new(RejectSecrets));
        assert!(chain.before_write("secret:token", json!(1)).is_err());
        assert!(chain.before_write("plain", json!(1)).is_ok());
    }
}
