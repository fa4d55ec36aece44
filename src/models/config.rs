use crate::models::{FALLBACK_RESTORE_TIER, QualityTier};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine tunables loaded from `engine.yaml`.
///
/// All timings are settle delays or retry intervals tuned for a host that
/// renders asynchronously; none of them are correctness boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Quiet window after the last navigation signal before the page is considered settled.
    pub navigation_settle_ms: u64,
    /// Interval of the identity-polling navigation fallback.
    pub navigation_poll_ms: u64,

    /// Debounce applied to quality operation requests.
    pub debounce_ms: u64,
    /// Delay before a request that collided with a different in-flight operation is retried.
    pub requeue_delay_ms: u64,
    /// Wait between the programmatic setters and the quality read-back.
    pub verify_delay_ms: u64,

    pub menu_open_settle_ms: u64,
    pub submenu_settle_ms: u64,
    pub select_settle_ms: u64,

    /// Extraction attempts in filtered mode before the video counts as "no match".
    pub extraction_retries: u32,
    pub extraction_retry_ms: u64,

    /// Upper bound on waiting for playback before the first Set operation.
    pub playback_wait_timeout_ms: u64,
    pub playback_poll_ms: u64,

    /// Attempts to locate the host player before giving up on an operation.
    pub player_lookup_attempts: u32,
    pub player_lookup_backoff_ms: u64,

    pub usage_tick_secs: u64,
    /// Quality drift is checked every N usage ticks.
    pub enforcement_every_ticks: u32,

    /// Toggles arriving within this window of an accepted toggle are ignored.
    pub toggle_guard_ms: u64,
    /// How long a command sender waits for the engine's reply.
    pub command_timeout_ms: u64,

    /// Last-resort restore target. Audio tiers are rejected at resolution time.
    pub default_restore_quality: QualityTier,

    pub debug_mode: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            navigation_settle_ms: 450,
            navigation_poll_ms: 1500,
            debounce_ms: 300,
            requeue_delay_ms: 500,
            verify_delay_ms: 500,
            menu_open_settle_ms: 150,
            submenu_settle_ms: 250,
            select_settle_ms: 150,
            extraction_retries: 5,
            extraction_retry_ms: 600,
            playback_wait_timeout_ms: 3000,
            playback_poll_ms: 100,
            player_lookup_attempts: 8,
            player_lookup_backoff_ms: 250,
            usage_tick_secs: 5,
            enforcement_every_ticks: 2,
            toggle_guard_ms: 300,
            command_timeout_ms: 1000,
            default_restore_quality: FALLBACK_RESTORE_TIER,
            debug_mode: false,
        }
    }
}

impl EngineConfig {
    pub fn navigation_settle(&self) -> Duration {
        Duration::from_millis(self.navigation_settle_ms)
    }

    pub fn navigation_poll(&self) -> Duration {
        Duration::from_millis(self.navigation_poll_ms.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn requeue_delay(&self) -> Duration {
        Duration::from_millis(self.requeue_delay_ms)
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }

    pub fn extraction_retry(&self) -> Duration {
        Duration::from_millis(self.extraction_retry_ms)
    }

    pub fn playback_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.playback_wait_timeout_ms)
    }

    pub fn playback_poll(&self) -> Duration {
        Duration::from_millis(self.playback_poll_ms.max(1))
    }

    pub fn player_lookup_backoff(&self) -> Duration {
        Duration::from_millis(self.player_lookup_backoff_ms)
    }

    pub fn usage_tick(&self) -> Duration {
        Duration::from_secs(self.usage_tick_secs.max(1))
    }

    pub fn toggle_guard(&self) -> Duration {
        Duration::from_millis(self.toggle_guard_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn menu_timings(&self) -> MenuTimings {
        MenuTimings {
            open_settings: Duration::from_millis(self.menu_open_settle_ms),
            open_submenu: Duration::from_millis(self.submenu_settle_ms),
            select: Duration::from_millis(self.select_settle_ms),
        }
    }
}

/// Per-step settle delays of the quality menu fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MenuTimings {
    pub open_settings: Duration,
    pub open_submenu: Duration,
    pub select: Duration,
}
