use crate::models::EngineConfig;
use crate::storage::YamlFileStore;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, Environment, File, FileFormat};
use std::fs;

/// Prefix of environment variables overriding `engine.yaml` keys
/// (e.g. `AUDIOMODE_DEBOUNCE_MS=100`).
pub const ENV_PREFIX: &str = "AUDIOMODE";

/// Configuration manager for the engine's on-disk files.
///
/// Manages two files in one directory:
/// - Engine config (`engine.yaml`): timings, retry bounds, default restore tier
/// - Preference store (`storage.yaml`): the key-value document shared with the popup
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    engine_config_path: Utf8PathBuf,
    storage_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// # Arguments
    /// * `config_dir` - Directory containing configuration files (e.g., "AudioMode Data")
    ///
    /// # Returns
    /// A new ConfigManager instance
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        // Create config directory if it doesn't exist
        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            engine_config_path: config_dir.join("engine.yaml"),
            storage_path: config_dir.join("storage.yaml"),
            config_dir,
        })
    }

    /// Load the engine configuration.
    ///
    /// Keys missing from `engine.yaml` (or the whole file) fall back to
    /// defaults; `AUDIOMODE_*` environment variables override both.
    ///
    /// # Returns
    /// The merged EngineConfig
    pub fn load_engine_config(&self) -> Result<EngineConfig> {
        if !self.engine_config_path.exists() {
            tracing::warn!(
                "Engine config file not found at {}, using defaults",
                self.engine_config_path
            );
        }

        let config: EngineConfig = Config::builder()
            .add_source(
                File::from(self.engine_config_path.as_std_path())
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .with_context(|| format!("Failed to read engine config: {}", self.engine_config_path))?
            .try_deserialize()
            .with_context(|| {
                format!("Failed to parse engine config: {}", self.engine_config_path)
            })?;

        tracing::info!("Loaded engine config from {}", self.engine_config_path);
        Ok(config)
    }

    /// Save the engine configuration file.
    ///
    /// # Arguments
    /// * `config` - The EngineConfig to save
    pub fn save_engine_config(&self, config: &EngineConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize engine config to YAML")?;

        fs::write(&self.engine_config_path, yaml_string)
            .with_context(|| {
                format!("Failed to write engine config: {}", self.engine_config_path)
            })?;

        tracing::info!("Saved engine config to {}", self.engine_config_path);
        Ok(())
    }

    /// Open the preference store backing file, creating an empty one if needed.
    pub fn open_store(&self) -> Result<YamlFileStore> {
        YamlFileStore::open(&self.storage_path)
            .with_context(|| format!("Failed to open preference store: {}", self.storage_path))
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn engine_config_path(&self) -> &Utf8Path {
        &self.engine_config_path
    }

    pub fn storage_path(&self) -> &Utf8Path {
        &self.storage_path
    }
}
