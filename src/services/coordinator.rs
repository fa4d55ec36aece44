//! Quality operation coordinator.
//!
//! Every quality change goes through [`QualityCoordinator`], the single point
//! that serializes them. A request first waits out a debounce window; a newer
//! request cancels that window. When the window elapses, the request runs only
//! if nothing else is in flight:
//!
//! - same kind in flight: the request is dropped (redundant triggers do not compound)
//! - different kind in flight: the request is re-queued after a short delay
//!
//! At most one executor call is active at a time, so at most one host menu
//! interaction can ever be open. The in-flight mark is cleared by a drop guard,
//! which also covers a task that is cancelled or panics mid-operation.

use crate::metrics::Metrics;
use crate::models::{EngineConfig, PendingOperation, QualityOperation};
use crate::services::enforcer::EnforceOutcome;
use crate::state::{EngineEvent, StateManager};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How far an operation may escalate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcePolicy {
    /// Programmatic setters, verification and the one-time menu fallback.
    Full,
    /// Programmatic setters and verification only (periodic re-enforcement).
    ApiOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityRequest {
    pub kind: QualityOperation,
    pub policy: EnforcePolicy,
}

impl QualityRequest {
    pub fn full(kind: QualityOperation) -> Self {
        Self {
            kind,
            policy: EnforcePolicy::Full,
        }
    }
}

/// Performs one quality operation against the host.
pub trait QualityExecutor: Send + Sync + 'static {
    fn execute(&self, request: QualityRequest) -> impl Future<Output = EnforceOutcome> + Send;
}

struct PendingTimer {
    id: u64,
    kind: QualityOperation,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    timer: Option<PendingTimer>,
    in_flight: Option<QualityOperation>,
    /// The in-flight operation belongs to an item the user already left.
    superseded: bool,
}

impl Slot {
    /// Whether a new request of `kind` repeats the in-flight operation.
    fn duplicates(&self, kind: QualityOperation) -> bool {
        self.in_flight == Some(kind) && !self.superseded
    }
}

struct Inner<E> {
    executor: E,
    slot: Mutex<Slot>,
    next_timer_id: AtomicU64,
    state: StateManager,
    metrics: Arc<Metrics>,
    debounce: Duration,
    requeue_delay: Duration,
}

impl<E> Inner<E> {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the in-flight mark when an execution ends, however it ends.
struct InFlightGuard<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Drop for InFlightGuard<E> {
    fn drop(&mut self) {
        let mut slot = self.inner.lock();
        slot.in_flight = None;
        slot.superseded = false;
    }
}

/// Serializes and de-duplicates quality operations. Cloning shares the queue.
pub struct QualityCoordinator<E: QualityExecutor> {
    inner: Arc<Inner<E>>,
}

impl<E: QualityExecutor> Clone for QualityCoordinator<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: QualityExecutor> QualityCoordinator<E> {
    pub fn new(
        executor: E,
        state: StateManager,
        metrics: Arc<Metrics>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                slot: Mutex::new(Slot::default()),
                next_timer_id: AtomicU64::new(1),
                state,
                metrics,
                debounce: config.debounce(),
                requeue_delay: config.requeue_delay(),
            }),
        }
    }

    pub fn executor(&self) -> &E {
        &self.inner.executor
    }

    /// Request a full operation after the configured debounce window.
    pub fn request(&self, kind: QualityOperation) {
        self.request_with_debounce(QualityRequest::full(kind), self.inner.debounce);
    }

    pub fn request_with_debounce(&self, request: QualityRequest, debounce: Duration) {
        let mut slot = self.inner.lock();

        let aborted = slot.timer.take().map(|previous| {
            previous.handle.abort();
            tracing::debug!(
                "Cancelled pending {} operation in favour of {}",
                previous.kind,
                request.kind
            );
        });

        if slot.duplicates(request.kind) {
            self.inner.metrics.record_deduplicated();
            tracing::debug!("{} operation already in flight, dropping request", request.kind);
            drop(slot);
            if aborted.is_some() {
                self.clear_pending_operation();
            }
            return;
        }

        let delay = match slot.in_flight {
            Some(running) => {
                self.inner.metrics.record_requeued();
                tracing::debug!(
                    "{} operation in flight, re-queueing {} in {:?}",
                    running,
                    request.kind,
                    self.inner.requeue_delay
                );
                self.inner.requeue_delay.max(debounce)
            }
            None => debounce,
        };

        self.schedule(&mut slot, request, delay);
        drop(slot);

        self.inner.state.update(|state| {
            state.pending_operation = Some(PendingOperation {
                kind: request.kind,
                requested_at: Instant::now(),
            });
        });
        self.inner
            .state
            .emit(EngineEvent::QualityOperationRequested { kind: request.kind });
    }

    /// Periodic drift correction: an API-only `Set`, skipped entirely when any
    /// operation is pending or running.
    ///
    /// # Returns
    /// `true` if the check was scheduled
    pub fn request_enforcement(&self) -> bool {
        let mut slot = self.inner.lock();
        if slot.timer.is_some() || slot.in_flight.is_some() {
            tracing::debug!("Skipping enforcement check: an operation is pending");
            return false;
        }

        let request = QualityRequest {
            kind: QualityOperation::Set,
            policy: EnforcePolicy::ApiOnly,
        };
        self.schedule(&mut slot, request, Duration::ZERO);
        true
    }

    /// Mark the running operation as belonging to a previous item, so a
    /// request of the same kind for the new item is re-queued instead of
    /// dropped.
    pub fn supersede_in_flight(&self) {
        let mut slot = self.inner.lock();
        if slot.in_flight.is_some() {
            slot.superseded = true;
        }
    }

    pub fn in_flight(&self) -> Option<QualityOperation> {
        self.inner.lock().in_flight
    }

    pub fn has_pending(&self) -> bool {
        self.inner.lock().timer.is_some()
    }

    /// Drop a request that has not started yet. A running operation is left
    /// to finish.
    pub fn cancel_pending(&self) {
        if let Some(timer) = self.inner.lock().timer.take() {
            timer.handle.abort();
            tracing::debug!("Cancelled pending {} operation", timer.kind);
        }
        self.clear_pending_operation();
    }

    fn clear_pending_operation(&self) {
        self.inner.state.update(|state| state.pending_operation = None);
    }

    fn schedule(&self, slot: &mut Slot, request: QualityRequest, delay: Duration) {
        let id = self.inner.next_timer_id.fetch_add(1, Ordering::Relaxed);
        let this = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if this.claim(id, request) {
                this.run(request).await;
            }
        });

        slot.timer = Some(PendingTimer {
            id,
            kind: request.kind,
            handle,
        });
    }

    /// Decide what a fired timer does. Returns `true` when the caller now owns
    /// the in-flight mark and must run the operation.
    fn claim(&self, id: u64, request: QualityRequest) -> bool {
        let mut slot = self.inner.lock();
        if slot.timer.as_ref().map(|timer| timer.id) != Some(id) {
            return false;
        }
        slot.timer = None;

        match slot.in_flight {
            Some(_) if slot.duplicates(request.kind) => {
                self.inner.metrics.record_deduplicated();
                drop(slot);
                self.clear_pending_operation();
                false
            }
            Some(_) => {
                self.inner.metrics.record_requeued();
                self.schedule(&mut slot, request, self.inner.requeue_delay);
                false
            }
            None => {
                slot.in_flight = Some(request.kind);
                true
            }
        }
    }

    async fn run(&self, request: QualityRequest) {
        let _guard = InFlightGuard {
            inner: self.inner.clone(),
        };

        self.inner.state.update(|state| {
            if state.pending_operation.is_some_and(|pending| pending.kind == request.kind) {
                state.pending_operation = None;
            }
        });
        self.inner
            .state
            .emit(EngineEvent::QualityOperationStarted { kind: request.kind });
        self.inner.metrics.record_operation_started();

        let started = Instant::now();
        let outcome = self.inner.executor.execute(request).await;
        self.inner.metrics.record_operation_time(started.elapsed());

        tracing::info!("{} operation finished: {:?}", request.kind, outcome);
        self.inner.state.emit(EngineEvent::QualityOperationFinished {
            kind: request.kind,
            outcome,
        });
    }
}
