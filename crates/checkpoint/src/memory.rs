use std::collections::HashMap;
use std::sync::RwLock;

use crate::{CheckpointError, CheckpointStore};

/// In-memory checkpoint store.
///
/// Records live as long as the store does. Useful for tests and for
/// callers that only need resumption within a single process.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    records: RwLock<HashMap<String, String>>,
}

impl MemoryCheckpointStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a record exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.records.read().unwrap().contains_key(key)
    }

    /// Returns all stored keys.
    pub fn keys(&self) -> Vec<String> {
        self.records.read().unwrap().keys().cloned().collect()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Returns `true` if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn get(&self, key: &str) -> Result<Option<String>, CheckpointError> {
        Ok(self.records.read().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CheckpointError> {
        self.records
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CheckpointError> {
        self.records.write().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_store_is_empty() {
        let store = MemoryCheckpointStore::new();
        assert!(store.is_empty());
        assert!(store.get("k").unwrap().is_none());
    }

    #[test]
    fn set_get_remove() {
        let store = MemoryCheckpointStore::new();
        store.set("k", "{\"a\":1}").unwrap();
        assert!(store.contains("k"));
        assert_eq!(store.get("k").unwrap().as_deref(), Some("{\"a\":1}"));

        store.set("k", "{\"a\":2}").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("{\"a\":2}"));
        assert_eq!(store.len(), 1);

        store.remove("k").unwrap();
        assert!(!store.contains("k"));
    }

    #[test]
    fn remove_missing_key_is_ok() {
        let store = MemoryCheckpointStore::new();
        assert!(store.remove("missing").is_ok());
    }
}
