//! Per-page bookkeeping that is not part of the persisted engine state.
//!
//! [`PageContext`] holds what belongs to the item currently on screen (the
//! cached player handle, whether the menu fallback already ran) together with
//! the [`OperationToken`] every long-running sequence checks before touching
//! the host again. Only the page observer resets it.

use crate::host::{HostPage, PlayerControl};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Monotonic generation counter used to cancel superseded work.
///
/// A sequence captures [`OperationToken::current`] when it starts and stops as
/// soon as [`OperationToken::is_current`] turns false.
#[derive(Debug, Default)]
pub struct OperationToken {
    generation: AtomicU64,
}

impl OperationToken {
    pub fn current(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Invalidate every captured generation. Returns the new one.
    pub fn bump(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }
}

/// State scoped to a single item.
#[derive(Clone, Default)]
pub struct PerVideoState {
    pub video_id: Option<String>,
    pub generation: u64,
    /// At most one menu fallback per item.
    pub fallback_attempted: bool,
    player: Option<Arc<dyn PlayerControl>>,
}

impl fmt::Debug for PerVideoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerVideoState")
            .field("video_id", &self.video_id)
            .field("generation", &self.generation)
            .field("fallback_attempted", &self.fallback_attempted)
            .field("player_cached", &self.player.is_some())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct PageContext {
    per_video: Mutex<PerVideoState>,
    token: OperationToken,
}

impl PageContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PerVideoState> {
        self.per_video.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn token(&self) -> &OperationToken {
        &self.token
    }

    /// Start a new item: cancel in-flight sequences, drop the cached player
    /// and, when the item changed, forget the fallback attempt.
    ///
    /// # Returns
    /// The generation now considered current
    pub fn reset_for_navigation(&self, video_id: Option<String>) -> u64 {
        let generation = self.token.bump();
        let mut per_video = self.lock();

        let same_item = video_id.is_some() && per_video.video_id == video_id;
        per_video.fallback_attempted = same_item && per_video.fallback_attempted;
        per_video.video_id = video_id;
        per_video.generation = generation;
        per_video.player = None;

        generation
    }

    pub fn per_video(&self) -> PerVideoState {
        self.lock().clone()
    }

    pub fn current_video_id(&self) -> Option<String> {
        self.lock().video_id.clone()
    }

    pub fn fallback_attempted(&self) -> bool {
        self.lock().fallback_attempted
    }

    /// Claim the fallback for the current item.
    ///
    /// # Returns
    /// `true` if this call claimed it, `false` if it was already used
    pub fn claim_fallback(&self) -> bool {
        let mut per_video = self.lock();
        if per_video.fallback_attempted {
            return false;
        }
        per_video.fallback_attempted = true;
        true
    }

    /// The cached player, looking it up with a fixed backoff when the cache is empty.
    ///
    /// The lookup is abandoned if a navigation happens while waiting; a handle
    /// found for an older item is never cached.
    pub async fn acquire_player(
        &self,
        page: &dyn HostPage,
        attempts: u32,
        backoff: Duration,
    ) -> Option<Arc<dyn PlayerControl>> {
        if let Some(player) = self.lock().player.clone() {
            return Some(player);
        }

        let generation = self.token.current();
        for attempt in 0..attempts.max(1) {
            if !self.token.is_current(generation) {
                return None;
            }

            if let Some(player) = page.find_player() {
                let mut per_video = self.lock();
                if per_video.generation == generation {
                    per_video.player = Some(player.clone());
                }
                return Some(player);
            }

            if attempt + 1 < attempts {
                tracing::debug!("Player not ready (attempt {}/{})", attempt + 1, attempts);
                tokio::time::sleep(backoff).await;
            }
        }

        tracing::warn!("Player not found after {} attempts", attempts);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::sim::SimulatedHost;

    #[test]
    fn test_token_bump_invalidates() {
        let token = OperationToken::default();
        let captured = token.current();
        assert!(token.is_current(captured));
        token.bump();
        assert!(!token.is_current(captured));
    }

    #[test]
    fn test_fallback_claimed_once_per_item() {
        let page = PageContext::new();
        page.reset_for_navigation(Some("vidAAAAAAAA".to_string()));

        assert!(page.claim_fallback());
        assert!(!page.claim_fallback());

        // Re-settling on the same item keeps the attempt
        page.reset_for_navigation(Some("vidAAAAAAAA".to_string()));
        assert!(page.fallback_attempted());

        page.reset_for_navigation(Some("vidBBBBBBBB".to_string()));
        assert!(!page.fallback_attempted());
        assert!(page.claim_fallback());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_player_retries_until_ready() {
        let sim = SimulatedHost::new();
        sim.update_behaviour(|b| b.player_ready = false);
        let page = Arc::new(PageContext::new());

        let task = {
            let sim = sim.clone();
            let page = page.clone();
            tokio::spawn(async move {
                page.acquire_player(&sim, 5, Duration::from_millis(100)).await
            })
        };

        tokio::time::sleep(Duration::from_millis(150)).await;
        sim.update_behaviour(|b| b.player_ready = true);

        assert!(task.await.unwrap().is_some());
        assert!(page.per_video().player.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_player_gives_up() {
        let sim = SimulatedHost::new();
        sim.update_behaviour(|b| b.player_ready = false);
        let page = PageContext::new();

        assert!(page.acquire_player(&sim, 3, Duration::from_millis(10)).await.is_none());
    }
}
