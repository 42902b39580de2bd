//! In-memory state storage.
//!
//! Thread-safe `StateStore` for embedding hosts that keep the editing
//! session in one process, and for tests (each test builds a fresh store).

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;

use crate::error::{GrindError, Result};
use crate::storage::StateStore;

/// In-memory state store.
///
/// Values are lost when the store is dropped.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStateStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
        }
    }

    /// Number of keys ever written.
    ///
    /// A poisoned lock still holds consistent data (writers never panic
    /// mid-insert), so this reads through it.
    pub fn len(&self) -> usize {
        match self.values.read() {
            Ok(values) => values.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> GrindError {
    GrindError::invalid_state("state store lock poisoned")
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let values = self.values.read().map_err(|_| poisoned())?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.write().map_err(|_| poisoned())?;
        values.insert(key.to_string(), value);
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(String, Value)>> {
        let values = self.values.read().map_err(|_| poisoned())?;
        Ok(values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
