//! Page observer: turns noisy navigation signals into one callback per
//! distinct navigation.
//!
//! All sources feed one [`NavigationSignal`] stream:
//!
//! - URL changes, DOM mutations and host navigation events, pushed by the
//!   browser binding
//! - an internal polling tick that compares the item identity in the current
//!   URL with the last one reported, for navigations that fire nothing
//!   (playlist auto-advance)
//!
//! Any signal arms a settle deadline; further signals push it back, but never
//! past a few settle windows after the first signal of the burst, so a page
//! that keeps mutating (live chat, comments) still settles. When the deadline
//! passes, the current identity is compared with the last reported
//! one and the callback fires only if it changed. Before the callback runs,
//! the per-page context is reset, which cancels in-flight menu sequences.

use crate::host::HostPage;
use crate::metrics::Metrics;
use crate::services::extractor::VideoInfoExtractor;
use crate::state::PageContext;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Longest a burst of signals can postpone the settle, in settle windows.
const MAX_SETTLE_WINDOWS: u32 = 4;

/// Something that may indicate a navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationSignal {
    UrlChanged(String),
    DomMutation,
    /// Host-emitted navigation event, by name (e.g. `yt-navigate-finish`).
    HostEvent(String),
    /// Externally driven identity check; the observer also polls on its own.
    PollTick,
}

/// A settled, distinct navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationNotice {
    /// `None` when the new page is not a watch page.
    pub video_id: Option<String>,
    /// Operation token generation started by this navigation.
    pub generation: u64,
}

pub struct PageObserver {
    page: Arc<dyn HostPage>,
    page_ctx: Arc<PageContext>,
    extractor: Arc<VideoInfoExtractor>,
    settle: Duration,
    poll_interval: Duration,
    metrics: Arc<Metrics>,
}

impl PageObserver {
    pub fn new(
        page: Arc<dyn HostPage>,
        page_ctx: Arc<PageContext>,
        extractor: Arc<VideoInfoExtractor>,
        settle: Duration,
        poll_interval: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            page,
            page_ctx,
            extractor,
            settle,
            poll_interval,
            metrics,
        }
    }

    fn current_identity(&self) -> Option<String> {
        self.extractor.video_id_from_url(&self.page.current_url())
    }

    /// Run the observer until the signal channel closes.
    ///
    /// The page that is loaded when the observer starts counts as the first
    /// navigation.
    ///
    /// # Arguments
    /// * `signals` - Navigation signals pushed by the host binding
    /// * `on_navigation` - Invoked once per settled, distinct navigation
    pub fn spawn<F>(
        self,
        mut signals: mpsc::Receiver<NavigationSignal>,
        mut on_navigation: F,
    ) -> JoinHandle<()>
    where
        F: FnMut(NavigationNotice) + Send + 'static,
    {
        tokio::spawn(async move {
            let mut poll =
                tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
            poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

            // `None` until the first navigation has been reported.
            let mut reported: Option<Option<String>> = None;
            let max_wait = self.settle * MAX_SETTLE_WINDOWS;
            let mut burst_start = Some(Instant::now());
            let mut deadline = Some(Instant::now() + self.settle);

            loop {
                let settle_timer = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => pending::<()>().await,
                    }
                };

                tokio::select! {
                    signal = signals.recv() => match signal {
                        Some(NavigationSignal::PollTick) => {
                            if deadline.is_none()
                                && reported.as_ref() != Some(&self.current_identity())
                            {
                                burst_start = Some(Instant::now());
                                deadline = Some(Instant::now() + self.settle);
                            }
                        }
                        Some(signal) => {
                            tracing::trace!("Navigation signal: {:?}", signal);
                            let now = Instant::now();
                            let start = *burst_start.get_or_insert(now);
                            deadline = Some((now + self.settle).min(start + max_wait));
                        }
                        None => {
                            tracing::debug!("Navigation signal channel closed - observer stopping");
                            break;
                        }
                    },
                    _ = poll.tick() => {
                        if deadline.is_none()
                            && reported.as_ref() != Some(&self.current_identity())
                        {
                            tracing::debug!("Polling detected an unannounced navigation");
                            burst_start = Some(Instant::now());
                            deadline = Some(Instant::now() + self.settle);
                        }
                    }
                    _ = settle_timer => {
                        deadline = None;
                        burst_start = None;
                        let identity = self.current_identity();
                        if reported.as_ref() == Some(&identity) {
                            tracing::trace!("Settled on the same item, no navigation");
                            continue;
                        }

                        let generation = self.page_ctx.reset_for_navigation(identity.clone());
                        self.metrics.record_navigation();
                        tracing::info!(
                            "Navigation settled on {:?} (generation {})",
                            identity,
                            generation
                        );

                        reported = Some(identity.clone());
                        on_navigation(NavigationNotice {
                            video_id: identity,
                            generation,
                        });
                    }
                }
            }
        })
    }
}
