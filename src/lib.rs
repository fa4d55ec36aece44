// AudioMode - audio-only playback engine for streaming pages
//
// This is the library crate containing the engine: quality enforcement, mode
// reconciliation and the host/storage seams it runs behind.
// The binary crate (main.rs) runs the engine against the simulated host.

pub mod config;
pub mod engine;
pub mod host;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use engine::{Engine, EngineCommand, EngineError, EngineHandle, EngineResponse};
pub use host::{Host, HostError};
pub use models::{EngineConfig, EngineState, EngineStatus, OperatingMode, QualityTier};
pub use state::{EngineEvent, StateManager};
pub use storage::{MemoryStore, PreferenceStore, YamlFileStore};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
