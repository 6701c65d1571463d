//! Isolated global namespace
//!
//! Every guest gets its own `Namespace`: a map of named values standing in
//! for the guest's globals. Two guests started in the same process never
//! share one, so writes made by one guest are invisible to the others.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default)]
pub struct Namespace {
    globals: Arc<RwLock<Map<String, Value>>>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.globals.read().get(key).cloned()
    }

    /// Set a global, returning the previous value.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.globals.write().insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.globals.write().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.globals.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.globals.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.globals.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.globals.read().is_empty()
    }

    pub fn clear(&self) {
        self.globals.write().clear();
    }

    /// True if both handles refer to the same underlying map.
    pub fn same_as(&self, other: &Namespace) -> bool {
        Arc::ptr_eq(&self.globals, &other.globals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_namespaces_are_isolated() {
        let a = Namespace::new();
        let b = Namespace::new();

        a.set("counter", json!(1));
        assert_eq!(a.get("counter"), Some(json!(1)));
        assert_eq!(b.get("counter"), None);
        assert!(!a.same_as(&b));

        let a2 = a.clone();
        a2.set("counter", json!(2));
        assert_eq!(a.get("counter"), Some(json!(2)));
        assert!(a.same_as(&a2));
    }
}
