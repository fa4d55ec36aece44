use crate::models::{OperatingMode, QualityTier, VideoIdentity};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// Kind of quality-changing operation the coordinator serializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityOperation {
    /// Pin the audio-mode tier.
    Set,
    /// Leave audio mode: go back to the remembered or preferred tier.
    Restore,
    /// Apply the user's general quality choice outside audio mode.
    Preferred,
}

impl fmt::Display for QualityOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QualityOperation::Set => "set",
            QualityOperation::Restore => "restore",
            QualityOperation::Preferred => "preferred",
        };
        f.write_str(name)
    }
}

/// Operation that has been requested but not started yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOperation {
    pub kind: QualityOperation,
    pub requested_at: Instant,
}

/// Single source of truth for the engine in one page context.
///
/// Owned by [`crate::state::StateManager`]; never accessed as a global. On
/// navigation it is reset through [`EngineState::reset_for_navigation`] rather
/// than recreated, so session-level memory (saved quality, mode) survives.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub audio_mode_enabled: bool,
    pub last_applied_video_id: Option<String>,
    pub saved_quality_before_audio_mode: Option<QualityTier>,
    pub current_operating_mode: OperatingMode,
    pub pending_operation: Option<PendingOperation>,

    /// Identity extracted for the current item, if extraction succeeded.
    pub current_video: Option<VideoIdentity>,
}

impl EngineState {
    pub fn reset_for_navigation(&mut self) {
        self.current_video = None;
    }

    pub fn current_video_id(&self) -> Option<&str> {
        self.current_video.as_ref().map(|video| video.video_id.as_str())
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            enabled: self.audio_mode_enabled,
            mode: self.current_operating_mode,
        }
    }
}

/// Reply to a status query from the popup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub enabled: bool,
    pub mode: OperatingMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_keeps_session_memory() {
        let mut state = EngineState {
            audio_mode_enabled: true,
            saved_quality_before_audio_mode: Some(QualityTier::Hd1080),
            current_video: Some(VideoIdentity::new("vidAAAAAAAA")),
            ..EngineState::default()
        };

        state.reset_for_navigation();

        assert!(state.current_video.is_none());
        assert!(state.audio_mode_enabled);
        assert_eq!(state.saved_quality_before_audio_mode, Some(QualityTier::Hd1080));
    }

    #[test]
    fn test_status_reflects_state() {
        let state = EngineState {
            audio_mode_enabled: true,
            current_operating_mode: OperatingMode::Filtered,
            ..EngineState::default()
        };
        assert_eq!(
            state.status(),
            EngineStatus {
                enabled: true,
                mode: OperatingMode::Filtered
            }
        );
    }
}
