//! Usage tracking side loop.
//!
//! While audio mode is enabled a tick fires every `usage_tick_secs`. Each tick
//! adds the tick length to the day's active seconds, and to listened seconds
//! when the player is actually playing. Every `enforcement_every_ticks` ticks
//! the loop also checks the playing quality and asks the coordinator for an
//! API-only re-enforcement when it drifted off the audio tier.

use crate::host::HostPage;
use crate::metrics::Metrics;
use crate::models::{AUDIO_TARGET, EngineConfig, UsageCounters, UsageLedger};
use crate::services::coordinator::{QualityCoordinator, QualityExecutor};
use crate::services::enforcer::is_acceptable;
use crate::services::fallback_menu::Direction;
use crate::state::{EngineEvent, PageContext, StateManager};
use crate::storage::GuardedStore;
use chrono::NaiveDate;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Source of the local calendar date counters are filed under.
pub type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

pub fn local_clock() -> Clock {
    Arc::new(|| chrono::Local::now().date_naive())
}

struct TrackerInner<E: QualityExecutor> {
    page: Arc<dyn HostPage>,
    page_ctx: Arc<PageContext>,
    state: StateManager,
    store: Arc<GuardedStore>,
    coordinator: QualityCoordinator<E>,
    config: EngineConfig,
    metrics: Arc<Metrics>,
    clock: Clock,
}

impl<E: QualityExecutor> TrackerInner<E> {
    async fn tick(&self, tick: u64) -> Option<UsageCounters> {
        if !self.state.read(|state| state.audio_mode_enabled) {
            return None;
        }

        let seconds = self.config.usage_tick().as_secs();
        let player = self
            .page_ctx
            .acquire_player(self.page.as_ref(), 1, self.config.player_lookup_backoff())
            .await;
        let playing = player.as_ref().is_some_and(|player| player.is_playing());

        let date = (self.clock)();
        let listened = if playing { seconds } else { 0 };
        let counters = self.store.record_usage(date, listened, seconds);
        self.metrics.record_usage_tick();

        if let Some(counters) = counters {
            self.state.emit(EngineEvent::UsageRecorded {
                date: UsageLedger::date_key(date),
                listened_seconds: counters.listened_seconds,
                active_seconds: counters.active_seconds,
            });
        }

        let every = u64::from(self.config.enforcement_every_ticks.max(1));
        if tick % every == 0
            && let Some(player) = player
            && let Some(current) = player.playback_quality()
            && !is_acceptable(
                AUDIO_TARGET,
                current,
                &player.available_qualities(),
                Direction::Lowering,
            )
        {
            tracing::debug!("Periodic check found quality {}, requesting re-enforcement", current);
            self.coordinator.request_enforcement();
        }

        self.metrics.log_periodic();
        counters
    }
}

/// Starts and stops the periodic usage loop.
pub struct UsageTracker<E: QualityExecutor> {
    inner: Arc<TrackerInner<E>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<E: QualityExecutor> UsageTracker<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        page: Arc<dyn HostPage>,
        page_ctx: Arc<PageContext>,
        state: StateManager,
        store: Arc<GuardedStore>,
        coordinator: QualityCoordinator<E>,
        config: EngineConfig,
        metrics: Arc<Metrics>,
        clock: Clock,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                page,
                page_ctx,
                state,
                store,
                coordinator,
                config,
                metrics,
                clock,
            }),
            task: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.lock().as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Start ticking. A second call while running is a no-op.
    pub fn start(&self) {
        let mut task = self.lock();
        if task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let inner = self.inner.clone();
        let period = inner.config.usage_tick();
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut tick: u64 = 0;
            loop {
                interval.tick().await;
                tick += 1;
                inner.tick(tick).await;
            }
        }));
        tracing::debug!("Usage tracking started ({:?} ticks)", period);
    }

    pub fn stop(&self) {
        if let Some(task) = self.lock().take() {
            task.abort();
            tracing::debug!("Usage tracking stopped");
        }
    }
}

impl<E: QualityExecutor> Drop for UsageTracker<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::sim::{SimVideo, SimulatedHost};
    use crate::models::QualityTier;
    use crate::services::coordinator::QualityRequest;
    use crate::services::enforcer::EnforceOutcome;
    use crate::storage::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct RecordingExecutor {
        calls: AtomicUsize,
    }

    impl QualityExecutor for RecordingExecutor {
        async fn execute(&self, _request: QualityRequest) -> EnforceOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            EnforceOutcome::Skipped
        }
    }

    struct Fixture {
        sim: SimulatedHost,
        state: StateManager,
        store: Arc<GuardedStore>,
        tracker: UsageTracker<RecordingExecutor>,
        coordinator: QualityCoordinator<RecordingExecutor>,
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn fixture() -> Fixture {
        let sim = SimulatedHost::new();
        sim.navigate(&SimVideo::new("vidAAAAAAAA", "A"));
        sim.set_quality(QualityTier::Tiny);

        let metrics = Arc::new(Metrics::new());
        let state = StateManager::new();
        let store = Arc::new(GuardedStore::new(Arc::new(MemoryStore::new()), metrics.clone()));
        let config = EngineConfig::default();
        let coordinator = QualityCoordinator::new(
            RecordingExecutor {
                calls: AtomicUsize::new(0),
            },
            state.clone(),
            metrics.clone(),
            &config,
        );
        let page_ctx = Arc::new(PageContext::new());
        page_ctx.reset_for_navigation(Some("vidAAAAAAAA".to_string()));

        let tracker = UsageTracker::new(
            Arc::new(sim.clone()),
            page_ctx,
            state.clone(),
            store.clone(),
            coordinator.clone(),
            config,
            metrics,
            Arc::new(today),
        );

        Fixture {
            sim,
            state,
            store,
            tracker,
            coordinator,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_only_while_enabled() {
        let f = fixture();
        f.state.update(|state| state.audio_mode_enabled = true);
        f.tracker.start();
        assert!(f.tracker.is_running());

        tokio::time::sleep(Duration::from_secs(11)).await;
        let day = f.store.usage().get(today()).unwrap();
        assert_eq!((day.listened_seconds, day.active_seconds), (10, 10));

        // Paused: active time still counts, listening does not
        f.sim.set_playing(false);
        tokio::time::sleep(Duration::from_secs(5)).await;
        let day = f.store.usage().get(today()).unwrap();
        assert_eq!((day.listened_seconds, day.active_seconds), (10, 15));

        f.state.update(|state| state.audio_mode_enabled = false);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(f.store.usage().get(today()).unwrap().active_seconds, 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drift_requests_enforcement_every_other_tick() {
        let f = fixture();
        f.state.update(|state| state.audio_mode_enabled = true);
        f.tracker.start();

        f.sim.set_quality(QualityTier::Hd720);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(f.coordinator.executor().calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.coordinator.executor().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_enforcement_without_drift() {
        let f = fixture();
        f.state.update(|state| state.audio_mode_enabled = true);
        f.tracker.start();

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(f.coordinator.executor().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_ticks() {
        let f = fixture();
        f.state.update(|state| state.audio_mode_enabled = true);
        f.tracker.start();
        f.tracker.stop();
        assert!(!f.tracker.is_running());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(f.store.usage().get(today()).is_none());
    }
}
