//! Integration tests for QualityCoordinator
//!
//! These tests verify:
//! - Bursts of requests inside the debounce window coalesce to the last one
//! - At most one operation executes at a time
//! - A request that collides with a different in-flight kind is re-queued
//! - A request of the in-flight kind is dropped

use audiomode::StateManager;
use audiomode::metrics::Metrics;
use audiomode::models::{EngineConfig, QualityOperation, QualityTier};
use audiomode::services::{EnforceOutcome, QualityCoordinator, QualityExecutor, QualityRequest};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, sleep};

/// Records executed kinds and the highest number of concurrent executions.
struct TrackingExecutor {
    executed: Mutex<Vec<QualityOperation>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    duration: Duration,
}

impl TrackingExecutor {
    fn new(duration: Duration) -> Self {
        Self {
            executed: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            duration,
        }
    }

    fn executed(&self) -> Vec<QualityOperation> {
        self.executed.lock().unwrap().clone()
    }
}

impl QualityExecutor for TrackingExecutor {
    async fn execute(&self, request: QualityRequest) -> EnforceOutcome {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.executed.lock().unwrap().push(request.kind);

        sleep(self.duration).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        EnforceOutcome::AppliedViaApi(QualityTier::Tiny)
    }
}

fn coordinator(duration: Duration) -> (QualityCoordinator<TrackingExecutor>, Arc<Metrics>) {
    let metrics = Arc::new(Metrics::new());
    let coordinator = QualityCoordinator::new(
        TrackingExecutor::new(duration),
        StateManager::new(),
        metrics.clone(),
        &EngineConfig::default(),
    );
    (coordinator, metrics)
}

#[tokio::test(start_paused = true)]
async fn test_different_kind_is_requeued_behind_in_flight() {
    let (coordinator, metrics) = coordinator(Duration::from_secs(1));

    coordinator.request(QualityOperation::Set);
    sleep(Duration::from_millis(400)).await;
    assert_eq!(coordinator.in_flight(), Some(QualityOperation::Set));

    coordinator.request(QualityOperation::Restore);
    sleep(Duration::from_secs(5)).await;

    let executor = coordinator.executor();
    assert_eq!(
        executor.executed(),
        vec![QualityOperation::Set, QualityOperation::Restore]
    );
    assert_eq!(executor.max_active.load(Ordering::SeqCst), 1);
    assert!(metrics.operations_requeued.load(Ordering::Relaxed) >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_same_kind_in_flight_is_dropped() {
    let (coordinator, metrics) = coordinator(Duration::from_secs(1));

    coordinator.request(QualityOperation::Set);
    sleep(Duration::from_millis(400)).await;
    coordinator.request(QualityOperation::Set);
    sleep(Duration::from_secs(3)).await;

    assert_eq!(coordinator.executor().executed(), vec![QualityOperation::Set]);
    assert_eq!(metrics.operations_deduplicated.load(Ordering::Relaxed), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pending_operation_is_visible_in_state() {
    let state = StateManager::new();
    let coordinator = QualityCoordinator::new(
        TrackingExecutor::new(Duration::from_millis(10)),
        state.clone(),
        Arc::new(Metrics::new()),
        &EngineConfig::default(),
    );

    coordinator.request(QualityOperation::Preferred);
    assert_eq!(
        state.read(|s| s.pending_operation.map(|p| p.kind)),
        Some(QualityOperation::Preferred)
    );
    assert!(coordinator.has_pending());

    sleep(Duration::from_secs(1)).await;
    assert!(state.read(|s| s.pending_operation.is_none()));
    assert!(!coordinator.has_pending());
}

#[tokio::test(start_paused = true)]
async fn test_no_overlap_under_interleaved_requests() {
    let (coordinator, _metrics) = coordinator(Duration::from_millis(700));
    let kinds = [
        QualityOperation::Set,
        QualityOperation::Restore,
        QualityOperation::Preferred,
    ];

    for round in 0..12 {
        coordinator.request(kinds[round % kinds.len()]);
        sleep(Duration::from_millis(350)).await;
    }
    sleep(Duration::from_secs(10)).await;

    let executor = coordinator.executor();
    assert!(!executor.executed().is_empty());
    assert_eq!(executor.max_active.load(Ordering::SeqCst), 1);
    assert!(coordinator.in_flight().is_none());
}

fn operation() -> impl Strategy<Value = QualityOperation> {
    prop_oneof![
        Just(QualityOperation::Set),
        Just(QualityOperation::Restore),
        Just(QualityOperation::Preferred),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Requests spaced closer than the debounce window collapse into the last one.
    #[test]
    fn prop_burst_inside_debounce_runs_only_last(
        burst in prop::collection::vec(operation(), 1..12),
        gap_ms in 0u64..250,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        let executed = runtime.block_on(async {
            let (coordinator, _metrics) = coordinator(Duration::from_millis(50));
            for kind in &burst {
                coordinator.request(*kind);
                sleep(Duration::from_millis(gap_ms)).await;
            }
            sleep(Duration::from_secs(2)).await;
            coordinator.executor().executed()
        });

        prop_assert_eq!(executed, vec![*burst.last().unwrap()]);
    }
}
