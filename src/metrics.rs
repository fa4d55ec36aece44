// Engine metrics module
//
// Lightweight counters for how quality operations, the menu fallback and
// storage behaved over a session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Session metrics shared by every engine component.
///
/// Uses atomic operations for thread-safe metric tracking without locks.
/// Counters are logged periodically by the usage tracker and once on shutdown.
#[derive(Debug)]
pub struct Metrics {
    /// Quality operations that reached the executor
    pub operations_started: AtomicU64,

    /// Requests dropped because the same kind was already in flight
    pub operations_deduplicated: AtomicU64,

    /// Requests re-queued because a different kind was in flight
    pub operations_requeued: AtomicU64,

    /// Operations abandoned because a newer navigation or operation superseded them
    pub operations_superseded: AtomicU64,

    /// Operations that ended with the target quality confirmed
    pub operations_verified: AtomicU64,

    /// Operations that ended without the target quality
    pub operations_unresolved: AtomicU64,

    /// Programmatic setter calls issued
    pub api_attempts: AtomicU64,

    /// Read-backs that did not report the target after the API attempt
    pub verify_failures: AtomicU64,

    /// Menu fallback sequences started
    pub fallback_runs: AtomicU64,

    /// Menu fallback sequences that selected an option
    pub fallback_selections: AtomicU64,

    /// Menu fallback sequences cut short by a newer navigation
    pub fallback_cancellations: AtomicU64,

    /// Settled navigations processed
    pub navigations: AtomicU64,

    /// Enforcement checks that found the quality drifted away from the audio tier
    pub drift_corrections: AtomicU64,

    /// Failed storage reads or writes
    pub storage_errors: AtomicU64,

    /// Usage tracking ticks while audio mode was enabled
    pub usage_ticks: AtomicU64,

    /// Total time spent inside quality operations in milliseconds
    pub total_operation_time_ms: AtomicU64,

    /// Engine start time
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            operations_started: AtomicU64::new(0),
            operations_deduplicated: AtomicU64::new(0),
            operations_requeued: AtomicU64::new(0),
            operations_superseded: AtomicU64::new(0),
            operations_verified: AtomicU64::new(0),
            operations_unresolved: AtomicU64::new(0),
            api_attempts: AtomicU64::new(0),
            verify_failures: AtomicU64::new(0),
            fallback_runs: AtomicU64::new(0),
            fallback_selections: AtomicU64::new(0),
            fallback_cancellations: AtomicU64::new(0),
            navigations: AtomicU64::new(0),
            drift_corrections: AtomicU64::new(0),
            storage_errors: AtomicU64::new(0),
            usage_ticks: AtomicU64::new(0),
            total_operation_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_operation_started(&self) {
        self.operations_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deduplicated(&self) {
        self.operations_deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_requeued(&self) {
        self.operations_requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_superseded(&self) {
        self.operations_superseded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_verified(&self) {
        self.operations_verified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unresolved(&self) {
        self.operations_unresolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_api_attempt(&self) {
        self.api_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_verify_failure(&self) {
        self.verify_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_run(&self) {
        self.fallback_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_selection(&self) {
        self.fallback_selections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_cancelled(&self) {
        self.fallback_cancellations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_navigation(&self) {
        self.navigations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drift_correction(&self) {
        self.drift_corrections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_error(&self) {
        self.storage_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_usage_tick(&self) {
        self.usage_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long one quality operation took
    pub fn record_operation_time(&self, duration: Duration) {
        self.total_operation_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average operation time in milliseconds
    pub fn avg_operation_time_ms(&self) -> f64 {
        let total = self.total_operation_time_ms.load(Ordering::Relaxed);
        let count = self.operations_started.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Audio Mode Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Operations: {} started, {} verified, {} unresolved, {} superseded",
            self.operations_started.load(Ordering::Relaxed),
            self.operations_verified.load(Ordering::Relaxed),
            self.operations_unresolved.load(Ordering::Relaxed),
            self.operations_superseded.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Requests: {} deduplicated, {} requeued (avg operation {:.0}ms)",
            self.operations_deduplicated.load(Ordering::Relaxed),
            self.operations_requeued.load(Ordering::Relaxed),
            self.avg_operation_time_ms()
        );
        tracing::info!(
            "API attempts: {}, verify failures: {}, drift corrections: {}",
            self.api_attempts.load(Ordering::Relaxed),
            self.verify_failures.load(Ordering::Relaxed),
            self.drift_corrections.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Menu fallback: {} runs, {} selections, {} cancelled",
            self.fallback_runs.load(Ordering::Relaxed),
            self.fallback_selections.load(Ordering::Relaxed),
            self.fallback_cancellations.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Navigations: {}, usage ticks: {}, storage errors: {}",
            self.navigations.load(Ordering::Relaxed),
            self.usage_ticks.load(Ordering::Relaxed),
            self.storage_errors.load(Ordering::Relaxed)
        );
    }

    /// Log periodic metrics (called from the usage tracker)
    pub fn log_periodic(&self) {
        tracing::debug!(
            "Metrics: {} operations, {} navigations, {} fallback runs, uptime {:.0}s",
            self.operations_started.load(Ordering::Relaxed),
            self.navigations.load(Ordering::Relaxed),
            self.fallback_runs.load(Ordering::Relaxed),
            self.uptime().as_secs_f64()
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
