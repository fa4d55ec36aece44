//! Quality enforcer: makes the host player actually report the wanted tier.
//!
//! One operation walks through:
//!
//! 1. **Attempt-API**: every programmatic setter, each best effort
//! 2. **Verify**: read the quality back after a settle delay
//! 3. **Fallback-UI**: the menu interaction in [`crate::services::fallback_menu`],
//!    at most once per item and never for API-only checks
//!
//! Nothing here returns an error; every failure degrades to an
//! [`EnforceOutcome`] describing where quality was left.

use crate::host::{HostPage, PlayerControl};
use crate::metrics::Metrics;
use crate::models::{
    AUDIO_TARGET, EngineConfig, FALLBACK_RESTORE_TIER, QualityOperation, QualityTier,
};
use crate::services::coordinator::{EnforcePolicy, QualityExecutor, QualityRequest};
use crate::services::fallback_menu::{Direction, FallbackResult, FallbackSequence};
use crate::state::{EngineEvent, PageContext, StateManager};
use crate::storage::GuardedStore;
use std::sync::Arc;

/// Where an operation left playback quality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnforceOutcome {
    /// The player already reported an acceptable tier; nothing was called.
    AlreadyApplied(QualityTier),
    AppliedViaApi(QualityTier),
    AppliedViaMenu(QualityTier),
    /// Best effort exhausted; quality stays where the host left it.
    Unresolved {
        target: QualityTier,
        current: Option<QualityTier>,
    },
    /// No target to apply (no preferred quality configured).
    Skipped,
    /// A newer navigation invalidated the operation.
    Superseded,
    PlayerUnavailable,
}

impl EnforceOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(
            self,
            EnforceOutcome::AlreadyApplied(_)
                | EnforceOutcome::AppliedViaApi(_)
                | EnforceOutcome::AppliedViaMenu(_)
        )
    }
}

/// Restore target by priority: session-saved tier, then the persisted
/// preference, then `default`. Audio tiers are never accepted, so leaving
/// audio mode can never land back in it.
pub fn resolve_restore_target(
    saved: Option<QualityTier>,
    preferred: Option<QualityTier>,
    default: QualityTier,
) -> QualityTier {
    [saved, preferred, Some(default)]
        .into_iter()
        .flatten()
        .find(|tier| !tier.is_audio_tier())
        .unwrap_or(FALLBACK_RESTORE_TIER)
}

/// Whether `current` satisfies a request for `target` given what the host offers.
///
/// - `Auto` is satisfied by any tier outside the audio tiers, or by anything
///   when the item only offers audio tiers.
/// - A target the host does not offer is satisfied by the lowest offered tier
///   when lowering. When restoring it is satisfied by the closest tier outside
///   the audio tiers, or by any such tier once the host falls back to `Auto`.
pub fn is_acceptable(
    target: QualityTier,
    current: QualityTier,
    available: &[QualityTier],
    direction: Direction,
) -> bool {
    if current == target {
        return true;
    }

    let concrete: Vec<QualityTier> = available
        .iter()
        .copied()
        .filter(|tier| *tier != QualityTier::Auto)
        .collect();

    if target == QualityTier::Auto {
        return !current.is_audio_tier() || concrete.iter().all(|tier| tier.is_audio_tier());
    }

    if concrete.contains(&target) {
        return false;
    }

    match direction {
        Direction::Lowering => QualityTier::lowest_available(&concrete) == Some(current),
        Direction::Restoring => match QualityTier::restore_substitute(target, available) {
            Some(QualityTier::Auto) => !current.is_audio_tier(),
            substitute => substitute == Some(current),
        },
    }
}

/// Tier actually handed to the setters: the target when offered, otherwise
/// its acceptable substitute.
fn effective_target(
    target: QualityTier,
    available: &[QualityTier],
    direction: Direction,
) -> QualityTier {
    if target == QualityTier::Auto || available.contains(&target) || available.is_empty() {
        return target;
    }
    let substitute = match direction {
        Direction::Lowering => QualityTier::lowest_available(available),
        Direction::Restoring => QualityTier::restore_substitute(target, available),
    };
    substitute.unwrap_or(target)
}

/// [`QualityExecutor`] that drives the host player.
pub struct QualityEnforcer {
    page: Arc<dyn HostPage>,
    page_ctx: Arc<PageContext>,
    state: StateManager,
    store: Arc<GuardedStore>,
    config: EngineConfig,
    metrics: Arc<Metrics>,
}

impl QualityEnforcer {
    pub fn new(
        page: Arc<dyn HostPage>,
        page_ctx: Arc<PageContext>,
        state: StateManager,
        store: Arc<GuardedStore>,
        config: EngineConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            page,
            page_ctx,
            state,
            store,
            config,
            metrics,
        }
    }

    /// Target tier for an operation kind. `None` when there is nothing to apply.
    pub fn resolve_target(&self, kind: QualityOperation) -> Option<QualityTier> {
        match kind {
            QualityOperation::Set => Some(AUDIO_TARGET),
            QualityOperation::Restore => {
                let saved = self.state.read(|state| state.saved_quality_before_audio_mode);
                Some(resolve_restore_target(
                    saved,
                    self.store.preferred_quality(),
                    self.config.default_restore_quality,
                ))
            }
            QualityOperation::Preferred => self.store.preferred_quality(),
        }
    }

    fn attempt_api(&self, player: &dyn PlayerControl, tier: QualityTier) {
        let attempts = [
            ("setPlaybackQuality", player.set_playback_quality(tier)),
            ("setPlaybackQualityRange", player.set_playback_quality_range(tier, tier)),
            ("setPreferredQuality", player.set_preferred_quality(tier)),
        ];

        for (name, result) in attempts {
            self.metrics.record_api_attempt();
            if let Err(e) = result {
                tracing::debug!("{}({}) failed: {}", name, tier, e);
            }
        }
    }

    async fn enforce(&self, request: QualityRequest) -> EnforceOutcome {
        let token = self.page_ctx.token();
        let generation = token.current();
        let video_id = self.page_ctx.current_video_id();

        let Some(target) = self.resolve_target(request.kind) else {
            tracing::debug!("No target quality for {} operation", request.kind);
            return EnforceOutcome::Skipped;
        };
        let direction = match request.kind {
            QualityOperation::Set => Direction::Lowering,
            QualityOperation::Restore | QualityOperation::Preferred => Direction::Restoring,
        };

        let Some(player) = self
            .page_ctx
            .acquire_player(
                self.page.as_ref(),
                self.config.player_lookup_attempts,
                self.config.player_lookup_backoff(),
            )
            .await
        else {
            return if token.is_current(generation) {
                EnforceOutcome::PlayerUnavailable
            } else {
                EnforceOutcome::Superseded
            };
        };

        let available = player.available_qualities();
        if let Some(current) = player.playback_quality()
            && is_acceptable(target, current, &available, direction)
        {
            if request.policy == EnforcePolicy::ApiOnly {
                tracing::trace!("Quality {} still acceptable for {}", current, target);
            } else {
                tracing::debug!("Quality already {} (target {})", current, target);
            }
            self.mark_applied(request.kind, video_id);
            return EnforceOutcome::AlreadyApplied(current);
        }

        if request.policy == EnforcePolicy::ApiOnly {
            self.metrics.record_drift_correction();
            tracing::info!("Quality drifted from {}, re-applying", target);
        }

        self.attempt_api(player.as_ref(), effective_target(target, &available, direction));
        tokio::time::sleep(self.config.verify_delay()).await;

        if !token.is_current(generation) {
            self.metrics.record_superseded();
            return EnforceOutcome::Superseded;
        }

        let current = player.playback_quality();
        if let Some(current) = current
            && is_acceptable(target, current, &available, direction)
        {
            self.metrics.record_verified();
            self.mark_applied(request.kind, video_id);
            return EnforceOutcome::AppliedViaApi(current);
        }

        self.metrics.record_verify_failure();
        tracing::debug!("Setters did not take effect: target {}, current {:?}", target, current);

        if request.policy == EnforcePolicy::ApiOnly {
            self.metrics.record_unresolved();
            return EnforceOutcome::Unresolved { target, current };
        }

        if !self.page_ctx.claim_fallback() {
            tracing::debug!("Menu fallback already used for {:?}", video_id);
            self.metrics.record_unresolved();
            return EnforceOutcome::Unresolved { target, current };
        }

        let Some(menu) = self.page.quality_menu() else {
            tracing::warn!("Quality menu not rendered, leaving quality at {:?}", current);
            self.metrics.record_unresolved();
            return EnforceOutcome::Unresolved { target, current };
        };

        self.state.emit(EngineEvent::FallbackStarted {
            video_id: video_id.clone(),
        });
        let result = FallbackSequence::new(
            menu,
            player.clone(),
            token,
            generation,
            self.config.menu_timings(),
            self.metrics.clone(),
        )
        .run(target, direction)
        .await;
        self.state.emit(EngineEvent::FallbackFinished {
            selected: match &result {
                FallbackResult::Selected { label, .. } => Some(label.clone()),
                _ => None,
            },
        });

        if let FallbackResult::Cancelled { .. } = result {
            self.metrics.record_superseded();
            return EnforceOutcome::Superseded;
        }

        let current = player.playback_quality();
        let available = player.available_qualities();
        match current {
            Some(current) if is_acceptable(target, current, &available, direction) => {
                self.metrics.record_verified();
                self.mark_applied(request.kind, video_id);
                EnforceOutcome::AppliedViaMenu(current)
            }
            _ => {
                self.metrics.record_unresolved();
                tracing::warn!("Could not apply {}; quality left at {:?}", target, current);
                EnforceOutcome::Unresolved { target, current }
            }
        }
    }

    fn mark_applied(&self, kind: QualityOperation, video_id: Option<String>) {
        if kind == QualityOperation::Set {
            self.state.update(|state| state.last_applied_video_id = video_id);
        }
    }
}

impl QualityExecutor for QualityEnforcer {
    async fn execute(&self, request: QualityRequest) -> EnforceOutcome {
        self.enforce(request).await
    }
}
