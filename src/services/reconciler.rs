//! Mode reconciler: the top-level Disabled/Enabled state machine.
//!
//! Inputs are settled navigations, operating mode changes, external
//! preference edits and the toggle command. Each one ends in a call to
//! [`ModeReconciler::reconcile`], which reads the operating mode and decides:
//!
//! | mode     | decision                                              |
//! |----------|-------------------------------------------------------|
//! | Always   | enabled                                               |
//! | Filtered | enabled iff the current item matches the whitelist    |
//! | Off      | disabled, and the preferred quality applied           |
//!
//! Entering Enabled hides the media surface, mounts the substitute visual,
//! requests `Set` once playback runs and starts usage tracking. Leaving it
//! undoes all four, with `Restore` in place of `Set`. Reconciling to Enabled
//! while already enabled only re-asserts `Set`.

use crate::host::{Host, HostPage};
use crate::metrics::Metrics;
use crate::models::{
    BackgroundTheme, EngineConfig, EngineStatus, OperatingMode, QualityOperation, VideoIdentity,
};
use crate::services::coordinator::{QualityCoordinator, QualityExecutor};
use crate::services::extractor::VideoInfoExtractor;
use crate::services::observer::NavigationNotice;
use crate::services::rules;
use crate::services::usage::{Clock, UsageTracker};
use crate::state::{EngineEvent, PageContext, StateManager};
use crate::storage::{GuardedStore, PreferenceChange, StorageKey};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Default)]
struct Lifecycle {
    /// Surface hiding plus the deferred `Set` of the current enable or re-assert.
    apply_task: Option<JoinHandle<()>>,
    last_toggle: Option<Instant>,
    applied_theme: Option<BackgroundTheme>,
    applied_language: Option<String>,
}

pub struct ModeReconciler<E: QualityExecutor> {
    host: Host,
    page_ctx: Arc<PageContext>,
    state: StateManager,
    store: Arc<GuardedStore>,
    extractor: Arc<VideoInfoExtractor>,
    coordinator: QualityCoordinator<E>,
    tracker: UsageTracker<E>,
    config: EngineConfig,
    lifecycle: Mutex<Lifecycle>,
}

impl<E: QualityExecutor> ModeReconciler<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: Host,
        page_ctx: Arc<PageContext>,
        state: StateManager,
        store: Arc<GuardedStore>,
        extractor: Arc<VideoInfoExtractor>,
        coordinator: QualityCoordinator<E>,
        config: EngineConfig,
        metrics: Arc<Metrics>,
        clock: Clock,
    ) -> Self {
        let tracker = UsageTracker::new(
            host.page.clone(),
            page_ctx.clone(),
            state.clone(),
            store.clone(),
            coordinator.clone(),
            config.clone(),
            metrics,
            clock,
        );

        Self {
            host,
            page_ctx,
            state,
            store,
            extractor,
            coordinator,
            tracker,
            config,
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> EngineStatus {
        self.state.status()
    }

    pub fn coordinator(&self) -> &QualityCoordinator<E> {
        &self.coordinator
    }

    /// Operating mode as currently persisted.
    pub fn stored_mode(&self) -> OperatingMode {
        self.store.mode()
    }

    pub fn is_tracking(&self) -> bool {
        self.tracker.is_running()
    }

    /// Handle a settled navigation reported by the page observer.
    pub async fn handle_navigation(&self, notice: NavigationNotice) {
        if !self.page_ctx.token().is_current(notice.generation) {
            tracing::debug!("Skipping superseded navigation {:?}", notice.video_id);
            return;
        }

        self.coordinator.supersede_in_flight();
        self.state.update(|state| state.reset_for_navigation());
        self.state.emit(EngineEvent::NavigationCompleted {
            video_id: notice.video_id.clone(),
            generation: notice.generation,
        });

        if notice.video_id.is_none() {
            tracing::debug!("Navigation to a non-watch page, nothing to reconcile");
            return;
        }

        let mode = self.store.mode();
        self.reconcile(mode).await;
    }

    /// The popup changed the operating mode.
    pub async fn handle_mode_changed(&self, mode: OperatingMode) {
        self.record_mode(mode);
        self.reconcile(mode).await;
    }

    /// Adopt and persist `mode` without reconciling yet. The state is updated
    /// before the write so the store's change echo is recognised as our own.
    pub fn record_mode(&self, mode: OperatingMode) {
        tracing::info!("Operating mode changed to {}", mode);
        self.state.update(|state| state.current_operating_mode = mode);
        self.store.set_mode(mode);
    }

    /// A stored value changed outside the engine, or an own write echoed back.
    pub async fn handle_preference_change(&self, change: PreferenceChange) {
        match change.key {
            StorageKey::OperatingMode => {
                let mode = change
                    .value
                    .and_then(|value| serde_json::from_value::<OperatingMode>(value).ok())
                    .unwrap_or_default();
                if mode == self.state.read(|state| state.current_operating_mode) {
                    return;
                }
                tracing::info!("Operating mode edited externally: {}", mode);
                self.reconcile(mode).await;
            }
            StorageKey::Whitelist => {
                let mode = self.state.read(|state| state.current_operating_mode);
                if mode == OperatingMode::Filtered {
                    tracing::debug!("Whitelist edited, re-evaluating current item");
                    self.reconcile(OperatingMode::Filtered).await;
                }
            }
            StorageKey::BackgroundTheme => {
                let theme = self.store.theme();
                self.apply_theme(&theme);
            }
            StorageKey::Language => {
                let language = self.store.language();
                self.apply_language(&language);
            }
            StorageKey::PreferredQuality | StorageKey::UsageStats => {}
        }
    }

    /// Decide the state for `mode` and the current item, and act on it.
    pub async fn reconcile(&self, mode: OperatingMode) {
        let generation = self.page_ctx.token().current();
        self.state.update(|state| state.current_operating_mode = mode);

        match mode {
            OperatingMode::Always => {
                let video = self.extractor.extract(self.host.page.as_ref());
                self.state.update(|state| state.current_video = video);
                self.enable_or_reassert();
            }
            OperatingMode::Off => {
                if !self.disable() {
                    self.coordinator.request(QualityOperation::Preferred);
                }
            }
            OperatingMode::Filtered => {
                let video = self.extract_with_retries(generation).await;

                if !self.page_ctx.token().is_current(generation) {
                    tracing::debug!("Navigation during evaluation, dropping stale result");
                    return;
                }
                let current_mode = self.state.read(|state| state.current_operating_mode);
                if current_mode != OperatingMode::Filtered {
                    tracing::debug!("Mode changed during evaluation, dropping stale result");
                    return;
                }

                let reason = video
                    .as_ref()
                    .and_then(|video| rules::matches_with_reason(video, &self.store.rules()));
                self.state.update(|state| state.current_video = video);

                match reason {
                    Some(reason) => {
                        tracing::info!("Whitelist match ({:?}), audio mode on", reason);
                        self.enable_or_reassert();
                    }
                    None => {
                        tracing::debug!("No whitelist match, audio mode off");
                        self.disable();
                    }
                }
            }
        }
    }

    /// Extract the current item, retrying while the host is still rendering.
    ///
    /// A channel rule can only match once the channel is known, so a result
    /// without a channel is retried too. The last partial result is used once
    /// retries run out.
    async fn extract_with_retries(&self, generation: u64) -> Option<VideoIdentity> {
        let attempts = self.config.extraction_retries.max(1);
        let mut best = None;

        for attempt in 1..=attempts {
            if !self.page_ctx.token().is_current(generation) {
                return None;
            }

            match self.extractor.extract(self.host.page.as_ref()) {
                Some(video) if video.channel_id.is_some() => return Some(video),
                Some(video) => best = Some(video),
                None => {}
            }

            if attempt < attempts {
                tracing::debug!(
                    "Video info incomplete (attempt {}/{}), retrying",
                    attempt,
                    attempts
                );
                tokio::time::sleep(self.config.extraction_retry()).await;
            }
        }

        if best.is_none() {
            tracing::warn!("Could not extract video info after {} attempts", attempts);
        }
        best
    }

    fn enable_or_reassert(&self) {
        if !self.enable() {
            tracing::debug!("Audio mode already on, re-asserting quality");
            let mut lifecycle = self.lock();
            self.spawn_apply(&mut lifecycle, false);
        }
    }

    /// Transition to Enabled.
    ///
    /// # Returns
    /// `false` if audio mode was already on
    pub fn enable(&self) -> bool {
        let mut lifecycle = self.lock();
        if self.state.read(|state| state.audio_mode_enabled) {
            return false;
        }

        let theme = self.store.theme();
        let language = self.store.language();
        self.host.visual.mount(&theme, &language);
        lifecycle.applied_theme = Some(theme);
        lifecycle.applied_language = Some(language);

        self.spawn_apply(&mut lifecycle, true);
        self.state.update(|state| state.audio_mode_enabled = true);
        self.tracker.start();

        tracing::info!("Audio mode enabled");
        true
    }

    /// Transition to Disabled.
    ///
    /// # Returns
    /// `false` if audio mode was already off
    pub fn disable(&self) -> bool {
        let mut lifecycle = self.lock();
        if !self.state.read(|state| state.audio_mode_enabled) {
            return false;
        }

        if let Some(task) = lifecycle.apply_task.take() {
            task.abort();
        }
        if let Some(player) = self.host.page.find_player() {
            player.set_surface_hidden(false);
        }
        self.coordinator.request(QualityOperation::Restore);
        self.host.visual.unmount();
        lifecycle.applied_theme = None;
        lifecycle.applied_language = None;
        self.tracker.stop();
        self.state.update(|state| state.audio_mode_enabled = false);

        tracing::info!("Audio mode disabled");
        true
    }

    /// Flip audio mode and persist the matching operating mode.
    ///
    /// Toggles inside the guard window of an accepted toggle are ignored, so a
    /// key held down or a double click yields one transition.
    pub fn toggle(&self) -> EngineStatus {
        {
            let mut lifecycle = self.lock();
            let now = Instant::now();
            if lifecycle
                .last_toggle
                .is_some_and(|last| now.duration_since(last) < self.config.toggle_guard())
            {
                tracing::debug!("Ignoring toggle inside guard window");
                return self.status();
            }
            lifecycle.last_toggle = Some(now);
        }

        let mode = if self.state.read(|state| state.audio_mode_enabled) {
            self.disable();
            OperatingMode::Off
        } else {
            self.enable();
            OperatingMode::Always
        };

        self.state.update(|state| state.current_operating_mode = mode);
        self.store.set_mode(mode);
        self.status()
    }

    pub fn update_theme(&self, theme: BackgroundTheme) {
        self.store.set_theme(&theme);
        self.apply_theme(&theme);
    }

    pub fn update_language(&self, language: String) {
        self.store.set_language(&language);
        self.apply_language(&language);
    }

    fn apply_theme(&self, theme: &BackgroundTheme) {
        let mut lifecycle = self.lock();
        if !self.state.read(|state| state.audio_mode_enabled)
            || lifecycle.applied_theme.as_ref() == Some(theme)
        {
            return;
        }
        self.host.visual.set_theme(theme);
        lifecycle.applied_theme = Some(theme.clone());
    }

    fn apply_language(&self, language: &str) {
        let mut lifecycle = self.lock();
        if !self.state.read(|state| state.audio_mode_enabled)
            || lifecycle.applied_language.as_deref() == Some(language)
        {
            return;
        }
        self.host.visual.set_language(language);
        lifecycle.applied_language = Some(language.to_string());
    }

    /// Hide the surface and request `Set` once playback runs.
    fn spawn_apply(&self, lifecycle: &mut Lifecycle, save_quality: bool) {
        if let Some(previous) = lifecycle.apply_task.take() {
            previous.abort();
        }

        let page = self.host.page.clone();
        let page_ctx = self.page_ctx.clone();
        let state = self.state.clone();
        let coordinator = self.coordinator.clone();
        let attempts = self.config.player_lookup_attempts;
        let backoff = self.config.player_lookup_backoff();
        let timeout = self.config.playback_wait_timeout();
        let poll = self.config.playback_poll();

        lifecycle.apply_task = Some(tokio::spawn(async move {
            let Some(player) = page_ctx
                .acquire_player(page.as_ref(), attempts, backoff)
                .await
            else {
                tracing::warn!("No player to put into audio mode");
                return;
            };

            player.set_surface_hidden(true);

            if save_quality
                && let Some(current) = player.playback_quality()
                && !current.is_audio_tier()
            {
                tracing::debug!("Remembering {} to restore later", current);
                state.update(|state| state.saved_quality_before_audio_mode = Some(current));
            }

            if !wait_for_playback(page.as_ref(), &page_ctx, timeout, poll).await {
                tracing::debug!(
                    "Playback not confirmed within {:?}, applying quality anyway",
                    timeout
                );
            }
            coordinator.request(QualityOperation::Set);
        }));
    }
}

/// Poll until the player reports playback or `timeout` elapses.
async fn wait_for_playback(
    page: &dyn HostPage,
    page_ctx: &PageContext,
    timeout: Duration,
    poll: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(player) = page_ctx.acquire_player(page, 1, Duration::ZERO).await
            && player.is_playing()
        {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

impl<E: QualityExecutor> Drop for ModeReconciler<E> {
    fn drop(&mut self) {
        if let Some(task) = self.lock().apply_task.take() {
            task.abort();
        }
    }
}
