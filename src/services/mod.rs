//! Services module - the audio-mode engine's business logic.
//!
//! Everything in here talks to the page only through the [`crate::host`]
//! traits and to persisted preferences only through [`crate::storage`], so the
//! whole engine runs unchanged against the simulated host in tests.
//!
//! # Components
//!
//! - [`PageObserver`]: folds URL changes, DOM mutations, host events and
//!   identity polling into one settled callback per navigation
//! - [`VideoInfoExtractor`]: reads video id, title and channel from the page
//! - [`rules`]: whitelist matching for filtered mode
//! - [`QualityCoordinator`]: debounces, de-duplicates and serializes quality
//!   operations so at most one host interaction runs at a time
//! - [`QualityEnforcer`]: setters, read-back verification and the one-time
//!   menu fallback ([`FallbackSequence`])
//! - [`ModeReconciler`]: the Disabled/Enabled state machine
//! - [`UsageTracker`]: per-day listening counters and periodic drift checks
//!
//! # Flow
//!
//! ```text
//! PageObserver -> ModeReconciler -> (rules) -> QualityCoordinator
//!     -> QualityEnforcer -> host player
//!                       |
//!                       +-> UsageTracker (side loop while enabled)
//! ```

pub mod coordinator;
pub mod enforcer;
pub mod extractor;
pub mod fallback_menu;
pub mod observer;
pub mod reconciler;
pub mod rules;
pub mod usage;

pub use coordinator::{EnforcePolicy, QualityCoordinator, QualityExecutor, QualityRequest};
pub use enforcer::{EnforceOutcome, QualityEnforcer, is_acceptable, resolve_restore_target};
pub use extractor::VideoInfoExtractor;
pub use fallback_menu::{Direction, FallbackResult, FallbackSequence, FallbackStep, choose_option};
pub use observer::{NavigationNotice, NavigationSignal, PageObserver};
pub use reconciler::ModeReconciler;
pub use rules::{MatchReason, matches, matches_with_reason};
pub use usage::{Clock, UsageTracker, local_clock};
