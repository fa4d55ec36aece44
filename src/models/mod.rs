//! Data models for the audio-mode engine.
//!
//! This module contains the core data structures shared by every component:
//! - [`EngineState`]: The engine's single state object (enabled flag, saved
//!   quality, mode, pending operation)
//! - [`QualityTier`]: Host playback tiers with ordering for "lowest available" selection
//! - [`FilterRuleSet`] / [`WhitelistRule`]: The whitelist consulted in filtered mode
//! - [`VideoIdentity`]: The identity of the item currently on screen
//! - [`UsageLedger`] / [`UsageCounters`]: Per-day listening counters written
//!   for the statistics view
//! - [`Preferences`]: Typed view of everything the popup persists
//! - [`EngineConfig`]: Timings and retry bounds loaded from `engine.yaml`
//!
//! # Architecture Note
//!
//! Persisted models derive `Serialize`/`Deserialize` with the field names the
//! extension storage uses (camelCase), so the same documents can be shared with
//! the popup without translation.

pub mod config;
pub mod engine_state;
pub mod preferences;
pub mod quality;
pub mod rules;
pub mod usage;
pub mod video;

pub use config::{EngineConfig, MenuTimings};
pub use engine_state::{EngineState, EngineStatus, PendingOperation, QualityOperation};
pub use preferences::{BackgroundTheme, DEFAULT_LANGUAGE, OperatingMode, Preferences, ThemeKind};
pub use quality::{AUDIO_TARGET, FALLBACK_RESTORE_TIER, QualityTier};
pub use rules::{ChannelRule, FilterRuleSet, KeywordRule, WhitelistRule};
pub use usage::{UsageCounters, UsageLedger};
pub use video::VideoIdentity;
