//! Preference storage.
//!
//! The engine reads the user's choices (mode, whitelist, preferred quality,
//! theme, language) and writes usage counters through the [`PreferenceStore`]
//! key-value seam. Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: in-process map used by tests and the simulator
//! - [`YamlFileStore`]: a YAML document on disk, reloadable to pick up edits
//!   made by another process
//!
//! [`GuardedStore`] wraps either one with typed accessors. Read failures fall
//! back to defaults; the first failed write caused by an unavailable backend
//! disables further writes for the rest of the session.

pub mod memory;
pub mod yaml;

pub use memory::MemoryStore;
pub use yaml::YamlFileStore;

use crate::metrics::Metrics;
use crate::models::{
    BackgroundTheme, DEFAULT_LANGUAGE, FilterRuleSet, OperatingMode, Preferences, QualityTier,
    UsageCounters, UsageLedger,
};
use camino::Utf8PathBuf;
use chrono::NaiveDate;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::broadcast;

/// Keys the engine reads or writes. Names match the extension storage keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    OperatingMode,
    Whitelist,
    PreferredQuality,
    BackgroundTheme,
    Language,
    UsageStats,
}

impl StorageKey {
    pub const ALL: [StorageKey; 6] = [
        StorageKey::OperatingMode,
        StorageKey::Whitelist,
        StorageKey::PreferredQuality,
        StorageKey::BackgroundTheme,
        StorageKey::Language,
        StorageKey::UsageStats,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StorageKey::OperatingMode => "operatingMode",
            StorageKey::Whitelist => "whitelist",
            StorageKey::PreferredQuality => "preferredQuality",
            StorageKey::BackgroundTheme => "backgroundTheme",
            StorageKey::Language => "language",
            StorageKey::UsageStats => "usageStats",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == name)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification that a stored value changed, whoever wrote it.
#[derive(Debug, Clone, PartialEq)]
pub struct PreferenceChange {
    pub key: StorageKey,
    /// `None` when the key was removed.
    pub value: Option<Value>,
}

/// Errors that can occur while reading or writing preferences
#[derive(Error, Debug)]
pub enum StorageError {
    /// The backend is gone for good (e.g. the extension context was invalidated)
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to serialize {key}: {message}")]
    Serialization { key: StorageKey, message: String },

    #[error("Storage I/O error at {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse storage file {path}: {message}")]
    Parse { path: Utf8PathBuf, message: String },
}

/// Key-value preference backend.
#[cfg_attr(test, mockall::automock)]
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: StorageKey) -> Result<Option<Value>, StorageError>;

    fn set(&self, key: StorageKey, value: Value) -> Result<(), StorageError>;

    /// Changes made by anyone, including this process.
    fn subscribe(&self) -> broadcast::Receiver<PreferenceChange>;
}

/// Typed, failure-tolerant access to a [`PreferenceStore`].
pub struct GuardedStore {
    inner: Arc<dyn PreferenceStore>,
    writes_disabled: AtomicBool,
    metrics: Arc<Metrics>,
}

impl GuardedStore {
    pub fn new(inner: Arc<dyn PreferenceStore>, metrics: Arc<Metrics>) -> Self {
        Self {
            inner,
            writes_disabled: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PreferenceChange> {
        self.inner.subscribe()
    }

    pub fn writes_disabled(&self) -> bool {
        self.writes_disabled.load(Ordering::SeqCst)
    }

    fn read<T: DeserializeOwned>(&self, key: StorageKey) -> Option<T> {
        match self.inner.get(key) {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    tracing::warn!("Ignoring malformed value for {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                self.metrics.record_storage_error();
                tracing::warn!("Failed to read {}: {}", key, e);
                None
            }
        }
    }

    fn write<T: Serialize>(&self, key: StorageKey, value: &T) -> bool {
        if self.writes_disabled() {
            tracing::debug!("Skipping write of {}: storage disabled for this session", key);
            return false;
        }

        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Failed to serialize {}: {}", key, e);
                return false;
            }
        };

        match self.inner.set(key, value) {
            Ok(()) => true,
            Err(StorageError::Unavailable(reason)) => {
                self.metrics.record_storage_error();
                if !self.writes_disabled.swap(true, Ordering::SeqCst) {
                    tracing::warn!(
                        "Storage unavailable ({}), disabling writes for this session",
                        reason
                    );
                }
                false
            }
            Err(e) => {
                self.metrics.record_storage_error();
                tracing::warn!("Failed to write {}: {}", key, e);
                false
            }
        }
    }

    pub fn mode(&self) -> OperatingMode {
        self.read(StorageKey::OperatingMode).unwrap_or_default()
    }

    pub fn rules(&self) -> FilterRuleSet {
        self.read(StorageKey::Whitelist).unwrap_or_default()
    }

    pub fn preferred_quality(&self) -> Option<QualityTier> {
        self.read(StorageKey::PreferredQuality)
    }

    pub fn theme(&self) -> BackgroundTheme {
        self.read(StorageKey::BackgroundTheme).unwrap_or_default()
    }

    pub fn language(&self) -> String {
        self.read::<String>(StorageKey::Language)
            .filter(|language| !language.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
    }

    pub fn usage(&self) -> UsageLedger {
        self.read(StorageKey::UsageStats).unwrap_or_default()
    }

    pub fn load_preferences(&self) -> Preferences {
        Preferences {
            mode: self.mode(),
            rules: self.rules(),
            preferred_quality: self.preferred_quality(),
            theme: self.theme(),
            language: self.language(),
        }
    }

    pub fn set_mode(&self, mode: OperatingMode) -> bool {
        self.write(StorageKey::OperatingMode, &mode)
    }

    pub fn set_rules(&self, rules: &FilterRuleSet) -> bool {
        self.write(StorageKey::Whitelist, rules)
    }

    pub fn set_preferred_quality(&self, tier: QualityTier) -> bool {
        self.write(StorageKey::PreferredQuality, &tier)
    }

    pub fn set_theme(&self, theme: &BackgroundTheme) -> bool {
        self.write(StorageKey::BackgroundTheme, theme)
    }

    pub fn set_language(&self, language: &str) -> bool {
        self.write(StorageKey::Language, &language)
    }

    /// Add to a day's counters with a read-modify-write of the ledger.
    ///
    /// # Returns
    /// The day's new totals, or `None` if the write did not happen
    pub fn record_usage(
        &self,
        date: NaiveDate,
        listened_seconds: u64,
        active_seconds: u64,
    ) -> Option<UsageCounters> {
        if self.writes_disabled() {
            return None;
        }

        let mut ledger = self.usage();
        let counters = ledger.record(date, listened_seconds, active_seconds);
        self.write(StorageKey::UsageStats, &ledger).then_some(counters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn guarded(store: MockPreferenceStore) -> GuardedStore {
        GuardedStore::new(Arc::new(store), Arc::new(Metrics::new()))
    }

    #[test]
    fn test_storage_key_names() {
        for key in StorageKey::ALL {
            assert_eq!(StorageKey::from_name(key.as_str()), Some(key));
        }
        assert_eq!(StorageKey::from_name("unknown"), None);
    }

    #[test]
    fn test_read_failure_falls_back_to_defaults() {
        let mut store = MockPreferenceStore::new();
        store
            .expect_get()
            .returning(|_| Err(StorageError::Unavailable("gone".to_string())));

        let guarded = guarded(store);
        let prefs = guarded.load_preferences();
        assert_eq!(prefs, Preferences::default());
        assert_eq!(guarded.metrics.storage_errors.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_malformed_value_ignored() {
        let mut store = MockPreferenceStore::new();
        store.expect_get().returning(|key| match key {
            StorageKey::OperatingMode => Ok(Some(json!("sometimes"))),
            StorageKey::PreferredQuality => Ok(Some(json!("hd1080"))),
            _ => Ok(None),
        });

        let guarded = guarded(store);
        assert_eq!(guarded.mode(), OperatingMode::Always);
        assert_eq!(guarded.preferred_quality(), Some(QualityTier::Hd1080));
    }

    #[test]
    fn test_unavailable_write_disables_further_writes() {
        let mut store = MockPreferenceStore::new();
        store.expect_get().returning(|_| Ok(None));
        store
            .expect_set()
            .times(1)
            .returning(|_, _| Err(StorageError::Unavailable("context invalidated".to_string())));

        let guarded = guarded(store);
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();

        assert!(guarded.record_usage(date, 5, 5).is_none());
        assert!(guarded.writes_disabled());
        // No second call reaches the backend
        assert!(!guarded.set_mode(OperatingMode::Off));
    }

    #[test]
    fn test_record_usage_accumulates() {
        let store = Arc::new(MemoryStore::new());
        let guarded = GuardedStore::new(store.clone(), Arc::new(Metrics::new()));
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();

        guarded.record_usage(date, 5, 5);
        let counters = guarded.record_usage(date, 0, 5).unwrap();

        assert_eq!(counters.listened_seconds, 5);
        assert_eq!(counters.active_seconds, 10);
        assert_eq!(
            store.value(StorageKey::UsageStats),
            Some(json!({"2026-10-19": {"listenedSeconds": 5, "activeSeconds": 10}}))
        );
    }
}
