//! Host abstraction - the page, player and overlay the engine drives.
//!
//! The engine never touches a DOM directly. A browser binding implements these
//! traits over the real page; [`sim::SimulatedHost`] implements them in-process
//! for the simulator binary and the test suites.
//!
//! # Traits
//!
//! - [`HostPage`]: read-only page access (URL, title, selector queries, embedded
//!   page state) plus lookups for the player and its quality menu
//! - [`PlayerControl`]: the player's programmatic quality setters, playback state
//!   and the media surface visibility
//! - [`QualityMenu`]: the native settings/quality menu affordances used by the
//!   UI fallback
//! - [`SubstituteVisual`]: the animated audio indicator shown instead of video
//!
//! Every method is synchronous: host calls are plain DOM reads/writes and all
//! waiting happens in the engine as explicit settle delays.

pub mod sim;

use crate::models::{BackgroundTheme, QualityTier};
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by host calls. None of them are fatal; callers log and degrade.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Host API not supported: {0}")]
    NotSupported(&'static str),

    #[error("Host element not ready: {0}")]
    NotReady(&'static str),

    #[error("Host rejected call: {0}")]
    Rejected(String),
}

/// Read access to the host page.
pub trait HostPage: Send + Sync {
    fn current_url(&self) -> String;

    fn document_title(&self) -> String;

    /// Text content of the first element matching `selector`.
    fn query_text(&self, selector: &str) -> Option<String>;

    /// Attribute of the first element matching `selector`.
    fn query_attribute(&self, selector: &str, attribute: &str) -> Option<String>;

    /// Raw embedded page-state JSON (the player response blob), if present.
    fn embedded_page_state(&self) -> Option<String>;

    /// The player element, or `None` while the host has not created it yet.
    fn find_player(&self) -> Option<Arc<dyn PlayerControl>>;

    /// The native quality menu, or `None` when its affordances are not rendered.
    fn quality_menu(&self) -> Option<Arc<dyn QualityMenu>>;
}

/// Programmatic surface of the host player.
///
/// Different host versions expose different subsets of the quality setters. A
/// setter may return `Ok(())` and still silently do nothing, which is why every
/// change is verified by reading back [`PlayerControl::playback_quality`].
pub trait PlayerControl: Send + Sync {
    fn set_playback_quality(&self, tier: QualityTier) -> Result<(), HostError>;

    fn set_playback_quality_range(
        &self,
        min: QualityTier,
        max: QualityTier,
    ) -> Result<(), HostError>;

    /// Persisted host-side preference used for the next item.
    fn set_preferred_quality(&self, tier: QualityTier) -> Result<(), HostError>;

    /// Quality currently playing. Hosts never report `Auto` here.
    fn playback_quality(&self) -> Option<QualityTier>;

    fn available_qualities(&self) -> Vec<QualityTier>;

    fn is_playing(&self) -> bool;

    fn current_time(&self) -> f64;

    fn play(&self) -> Result<(), HostError>;

    fn seek_to(&self, seconds: f64) -> Result<(), HostError>;

    /// Hide or show the video surface without touching playback.
    fn set_surface_hidden(&self, hidden: bool);
}

/// Native settings menu affordances.
pub trait QualityMenu: Send + Sync {
    /// Visually suppress (zero opacity, no pointer events) or restore the menu.
    fn set_suppressed(&self, suppressed: bool);

    fn open_settings(&self) -> Result<(), HostError>;

    fn open_quality_submenu(&self) -> Result<(), HostError>;

    /// Labels of the rendered quality options, top to bottom.
    fn option_labels(&self) -> Vec<String>;

    fn select_option(&self, index: usize) -> Result<(), HostError>;

    fn close(&self);
}

/// The animated audio indicator mounted over the hidden video surface.
#[cfg_attr(test, mockall::automock)]
pub trait SubstituteVisual: Send + Sync {
    fn mount(&self, theme: &BackgroundTheme, language: &str);

    fn set_theme(&self, theme: &BackgroundTheme);

    fn set_language(&self, language: &str);

    /// Remove the indicator and its event listeners.
    fn unmount(&self);
}

/// Everything the engine needs from the host, bundled for wiring.
#[derive(Clone)]
pub struct Host {
    pub page: Arc<dyn HostPage>,
    pub visual: Arc<dyn SubstituteVisual>,
}

impl Host {
    pub fn new(page: Arc<dyn HostPage>, visual: Arc<dyn SubstituteVisual>) -> Self {
        Self { page, visual }
    }
}
