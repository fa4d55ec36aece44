// State management module
//
// This module provides the StateManager which wraps EngineState with thread-safe
// access using Arc<RwLock<T>> and emits change events for the popup and tests.

pub mod page;

pub use page::{OperationToken, PageContext, PerVideoState};

use crate::models::{EngineState, EngineStatus, OperatingMode, QualityOperation};
use crate::services::enforcer::EnforceOutcome;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

/// Events emitted when engine state changes or an operation progresses.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// Audio mode switched on for the given item
    AudioModeEnabled { video_id: Option<String> },

    /// Audio mode switched off
    AudioModeDisabled,

    /// The persisted operating mode changed
    ModeChanged { mode: OperatingMode },

    /// A settled navigation reached the reconciler
    NavigationCompleted { video_id: Option<String>, generation: u64 },

    /// A quality operation was accepted by the coordinator
    QualityOperationRequested { kind: QualityOperation },

    /// A quality operation left its debounce window and started
    QualityOperationStarted { kind: QualityOperation },

    /// A quality operation finished
    QualityOperationFinished {
        kind: QualityOperation,
        outcome: EnforceOutcome,
    },

    /// The menu fallback sequence began for an item
    FallbackStarted { video_id: Option<String> },

    /// The menu fallback sequence ended (cleanup included)
    FallbackFinished { selected: Option<String> },

    /// Usage counters were written for a day
    UsageRecorded {
        date: String,
        listened_seconds: u64,
        active_seconds: u64,
    },
}

/// Thread-safe state manager with event emission
///
/// This is the central state component that:
/// - Provides thread-safe access to [`EngineState`] via `Arc<RwLock<T>>`
/// - Detects state changes and emits [`EngineEvent`]s
/// - Supports subscribing to events via tokio broadcast channels
///
/// # Usage
///
/// Always use `StateManager` instead of holding an [`EngineState`] directly:
/// - [`read()`](Self::read) for reading individual fields
/// - [`update()`](Self::update) for mutations with automatic event emission
/// - [`emit()`](Self::emit) for progress events that carry no state change
/// - [`subscribe()`](Self::subscribe) for listening to events
///
/// Cloning is cheap and shares the same state.
#[derive(Clone)]
pub struct StateManager {
    state: Arc<RwLock<EngineState>>,

    /// Multiple subscribers can listen for events
    event_tx: broadcast::Sender<EngineEvent>,
}

impl StateManager {
    /// Create a new StateManager with default state
    ///
    /// # Returns
    /// A new StateManager with a broadcast channel buffer of 256 events
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            state: Arc::new(RwLock::new(EngineState::default())),
            event_tx,
        }
    }

    /// Clone of the whole state, safe to use without holding locks.
    pub fn snapshot(&self) -> EngineState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Execute a function with read access to the state
    ///
    /// # Example
    /// ```ignore
    /// let enabled = state_manager.read(|state| state.audio_mode_enabled);
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&EngineState) -> R,
    {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Update the state and emit change events
    ///
    /// # Arguments
    /// * `update_fn` - A function that mutates the state
    ///
    /// # Returns
    /// The events that were emitted
    pub fn update<F>(&self, update_fn: F) -> Vec<EngineEvent>
    where
        F: FnOnce(&mut EngineState),
    {
        let changes = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let old_state = state.clone();
            update_fn(&mut state);
            Self::detect_changes(&old_state, &state)
        };

        for change in &changes {
            // Ignore send errors - it's OK if no one is listening
            let _ = self.event_tx.send(change.clone());
        }

        changes
    }

    /// Emit an event that does not correspond to a state field.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    pub fn status(&self) -> EngineStatus {
        self.read(EngineState::status)
    }

    fn detect_changes(old: &EngineState, new: &EngineState) -> Vec<EngineEvent> {
        let mut changes = Vec::new();

        if old.audio_mode_enabled != new.audio_mode_enabled {
            if new.audio_mode_enabled {
                changes.push(EngineEvent::AudioModeEnabled {
                    video_id: new.current_video_id().map(str::to_string),
                });
            } else {
                changes.push(EngineEvent::AudioModeDisabled);
            }
        }

        if old.current_operating_mode != new.current_operating_mode {
            changes.push(EngineEvent::ModeChanged {
                mode: new.current_operating_mode,
            });
        }

        changes
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VideoIdentity;

    #[test]
    fn test_enable_emits_event_with_video() {
        let manager = StateManager::new();
        let mut rx = manager.subscribe();

        let changes = manager.update(|state| {
            state.current_video = Some(VideoIdentity::new("vidAAAAAAAA"));
            state.audio_mode_enabled = true;
        });

        assert_eq!(
            changes,
            vec![EngineEvent::AudioModeEnabled {
                video_id: Some("vidAAAAAAAA".to_string())
            }]
        );
        assert_eq!(rx.try_recv().unwrap(), changes[0]);
    }

    #[test]
    fn test_no_event_without_change() {
        let manager = StateManager::new();
        let changes = manager.update(|state| {
            state.last_applied_video_id = Some("vidAAAAAAAA".to_string());
        });
        assert!(changes.is_empty());
    }

    #[test]
    fn test_mode_change_detected() {
        let manager = StateManager::new();
        let changes = manager.update(|state| {
            state.current_operating_mode = OperatingMode::Off;
        });
        assert_eq!(changes, vec![EngineEvent::ModeChanged { mode: OperatingMode::Off }]);
        assert_eq!(manager.status().mode, OperatingMode::Off);
    }

    #[test]
    fn test_clones_share_state() {
        let manager = StateManager::new();
        let other = manager.clone();
        other.update(|state| state.audio_mode_enabled = true);
        assert!(manager.read(|state| state.audio_mode_enabled));
    }
}
