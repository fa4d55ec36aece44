use crate::storage::{PreferenceChange, PreferenceStore, StorageError, StorageKey};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde_json::Value;
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Preference store backed by a single YAML document.
///
/// Keys are the storage key names (`operatingMode`, `whitelist`, ...). Unknown
/// keys found in the file are preserved on write. Edits made to the file by
/// another process are picked up by [`YamlFileStore::reload`], or periodically
/// by the task from [`YamlFileStore::spawn_reload`].
pub struct YamlFileStore {
    path: Utf8PathBuf,
    values: Mutex<IndexMap<String, Value>>,
    change_tx: broadcast::Sender<PreferenceChange>,
}

impl YamlFileStore {
    /// Open the store, reading the file if it exists.
    ///
    /// # Arguments
    /// * `path` - Location of the YAML document (created on first write)
    pub fn open<P: AsRef<Utf8Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let values = Self::read_file(&path)?;
        let (change_tx, _) = broadcast::channel(64);

        tracing::info!("Opened preference store at {} ({} keys)", path, values.len());
        Ok(Self {
            path,
            values: Mutex::new(values),
            change_tx,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, Value>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_file(path: &Utf8Path) -> Result<IndexMap<String, Value>, StorageError> {
        if !path.exists() {
            return Ok(IndexMap::new());
        }

        let contents = fs::read_to_string(path).map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if contents.trim().is_empty() {
            return Ok(IndexMap::new());
        }

        serde_yaml_ng::from_str(&contents).map_err(|e| StorageError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn write_file(&self, values: &IndexMap<String, Value>) -> Result<(), StorageError> {
        let yaml = serde_yaml_ng::to_string(values).map_err(|e| StorageError::Parse {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        if let Some(parent) = self.path.parent()
            && !parent.as_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        fs::write(&self.path, yaml).map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Reload the file every `period` so edits made by other processes reach
    /// subscribers. The task ends once the store has been dropped.
    pub fn spawn_reload(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    tracing::debug!("Preference store dropped - reload task stopping");
                    break;
                };
                match store.reload() {
                    Ok(changes) if !changes.is_empty() => {
                        tracing::debug!("Picked up {} external preference edits", changes.len());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Could not reload preferences from {}: {}", store.path, e)
                    }
                }
            }
        })
    }

    /// Re-read the file and notify subscribers about every known key whose
    /// value differs from what was loaded before.
    ///
    /// # Returns
    /// The changes that were broadcast
    pub fn reload(&self) -> Result<Vec<PreferenceChange>, StorageError> {
        let fresh = Self::read_file(&self.path)?;
        let mut values = self.lock();

        let changes: Vec<PreferenceChange> = StorageKey::ALL
            .into_iter()
            .filter_map(|key| {
                let old = values.get(key.as_str());
                let new = fresh.get(key.as_str());
                (old != new).then(|| PreferenceChange {
                    key,
                    value: new.cloned(),
                })
            })
            .collect();

        *values = fresh;
        drop(values);

        for change in &changes {
            tracing::debug!("Preference {} changed on disk", change.key);
            let _ = self.change_tx.send(change.clone());
        }
        Ok(changes)
    }
}

impl PreferenceStore for YamlFileStore {
    fn get(&self, key: StorageKey) -> Result<Option<Value>, StorageError> {
        Ok(self.lock().get(key.as_str()).cloned())
    }

    fn set(&self, key: StorageKey, value: Value) -> Result<(), StorageError> {
        let mut values = self.lock();
        if values.get(key.as_str()) == Some(&value) {
            return Ok(());
        }

        let mut updated = values.clone();
        updated.insert(key.as_str().to_string(), value.clone());
        self.write_file(&updated)?;
        *values = updated;
        drop(values);

        let _ = self.change_tx.send(PreferenceChange {
            key,
            value: Some(value),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PreferenceChange> {
        self.change_tx.subscribe()
    }
}
