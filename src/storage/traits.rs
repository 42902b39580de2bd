//! State store trait for Grind.
//!
//! The escalation controller persists its per-resource iteration counters
//! through this trait. Implementations only need per-key atomicity; the
//! hosting tool guarantees at most one cycle in flight per resource key.

use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;

/// Trait for keyed state persistence.
///
/// Values live for at least the duration of the editing session. Errors
/// are returned, never swallowed: the controller cannot decide without
/// knowing the prior count.
pub trait StateStore: Send + Sync {
    /// Read a value.
    ///
    /// Returns `Ok(None)` if the key has never been written.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: Value) -> Result<()>;

    /// All stored entries, in no particular order.
    fn entries(&self) -> Result<Vec<(String, Value)>>;
}

/// Blanket implementation of StateStore for Arc-wrapped stores.
///
/// Lets tests keep a handle on the store they hand to a controller.
impl<T: StateStore + ?Sized> StateStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        (**self).set(key, value)
    }

    fn entries(&self) -> Result<Vec<(String, Value)>> {
        (**self).entries()
    }
}

/// Test utilities for StateStore implementations.
#[cfg(test)]
pub mod tests {
    use super::*;
    use serde_json::json;

    /// Conformance check shared by every StateStore implementation.
    pub fn test_state_store_roundtrip<S: StateStore>(store: &S) {
        let key = "grind:src/lib.ts:iterations";

        // Missing keys read as absent
        assert!(store.get(key).unwrap().is_none());

        store.set(key, json!(3)).unwrap();
        assert_eq!(store.get(key).unwrap(), Some(json!(3)));

        // Overwrite replaces
        store.set(key, json!(0)).unwrap();
        assert_eq!(store.get(key).unwrap(), Some(json!(0)));

        // Keys are independent
        store.set("grind:src/other.ts:iterations", json!(1)).unwrap();
        assert_eq!(store.get(key).unwrap(), Some(json!(0)));

        let mut entries = store.entries().unwrap();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            entries,
            vec![
                ("grind:src/lib.ts:iterations".to_string(), json!(0)),
                ("grind:src/other.ts:iterations".to_string(), json!(1)),
            ]
        );
    }
}
