use crate::storage::{PreferenceChange, PreferenceStore, StorageError, StorageKey};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

/// In-process preference store.
///
/// Writes from any clone holder are broadcast to subscribers, which is how
/// tests simulate the popup editing a preference.
pub struct MemoryStore {
    values: Mutex<IndexMap<StorageKey, Value>>,
    change_tx: broadcast::Sender<PreferenceChange>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (change_tx, _) = broadcast::channel(64);
        Self {
            values: Mutex::new(IndexMap::new()),
            change_tx,
            fail_writes: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<StorageKey, Value>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a value without notifying subscribers.
    pub fn seed(&self, key: StorageKey, value: Value) {
        self.lock().insert(key, value);
    }

    pub fn value(&self, key: StorageKey) -> Option<Value> {
        self.lock().get(&key).cloned()
    }

    /// Make every subsequent write fail as if the backend went away.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: StorageKey) -> Result<Option<Value>, StorageError> {
        Ok(self.lock().get(&key).cloned())
    }

    fn set(&self, key: StorageKey, value: Value) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("extension context invalidated".to_string()));
        }

        let previous = self.lock().insert(key, value.clone());
        if previous.as_ref() != Some(&value) {
            let _ = self.change_tx.send(PreferenceChange {
                key,
                value: Some(value),
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PreferenceChange> {
        self.change_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_notifies_only_on_change() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();

        store.set(StorageKey::Language, json!("de")).unwrap();
        store.set(StorageKey::Language, json!("de")).unwrap();

        assert_eq!(rx.try_recv().unwrap().value, Some(json!("de")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_seed_is_silent() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        store.seed(StorageKey::OperatingMode, json!("off"));

        assert!(rx.try_recv().is_err());
        assert_eq!(store.get(StorageKey::OperatingMode).unwrap(), Some(json!("off")));
    }

    #[test]
    fn test_fail_writes() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(matches!(
            store.set(StorageKey::Language, json!("fr")),
            Err(StorageError::Unavailable(_))
        ));
        assert_eq!(store.value(StorageKey::Language), None);
    }
}
