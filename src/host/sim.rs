//! In-process simulated host.
//!
//! `SimulatedHost` models an uncooperative streaming page: setters that
//! silently no-op, a player that resets quality on every new item, a menu that
//! may render no labels or pause playback when opened. Every call is recorded
//! in a journal so tests and the simulator can inspect exactly what the engine did.

use crate::host::{Host, HostError, HostPage, PlayerControl, QualityMenu, SubstituteVisual};
use crate::models::{BackgroundTheme, QualityTier};
use crate::services::extractor::{CHANNEL_LINK_SELECTORS, TITLE_SELECTORS};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A single recorded interaction with the simulated host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    SetPlaybackQuality(QualityTier),
    SetPlaybackQualityRange(QualityTier, QualityTier),
    SetPreferredQuality(QualityTier),
    SurfaceHidden(bool),
    Play,
    Seek(f64),
    MenuSuppressed(bool),
    OpenSettings,
    OpenQualitySubmenu,
    SelectOption(String),
    CloseMenu,
    MountVisual,
    SetTheme(BackgroundTheme),
    SetLanguage(String),
    UnmountVisual,
}

/// How cooperative the simulated player is.
#[derive(Debug, Clone, PartialEq)]
pub struct SimBehaviour {
    pub honors_playback_quality: bool,
    pub honors_quality_range: bool,
    pub honors_preferred_quality: bool,
    /// When false, `set_playback_quality_range` reports `NotSupported`.
    pub supports_quality_range: bool,
    pub menu_available: bool,
    pub renders_menu_labels: bool,
    pub menu_pauses_playback: bool,
    pub player_ready: bool,
    /// Quality the host falls back to whenever a new item loads.
    pub quality_on_navigation: Option<QualityTier>,
    /// What "Auto" resolves to.
    pub auto_quality: QualityTier,
}

impl Default for SimBehaviour {
    fn default() -> Self {
        Self {
            honors_playback_quality: true,
            honors_quality_range: true,
            honors_preferred_quality: true,
            supports_quality_range: true,
            menu_available: true,
            renders_menu_labels: true,
            menu_pauses_playback: false,
            player_ready: true,
            quality_on_navigation: Some(QualityTier::Hd720),
            auto_quality: QualityTier::Hd720,
        }
    }
}

impl SimBehaviour {
    /// Every programmatic setter silently ignored; only the menu works.
    pub fn uncooperative() -> Self {
        Self {
            honors_playback_quality: false,
            honors_quality_range: false,
            honors_preferred_quality: false,
            ..Self::default()
        }
    }
}

/// Item loaded by [`SimulatedHost::navigate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimVideo {
    pub id: String,
    pub title: String,
    /// `UC...` id or `@handle`.
    pub channel_id: Option<String>,
    pub channel_name: Option<String>,
}

impl SimVideo {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            channel_id: None,
            channel_name: None,
        }
    }

    pub fn on_channel(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.channel_id = Some(id.into());
        self.channel_name = Some(name.into());
        self
    }
}

#[derive(Debug)]
struct SimState {
    url: String,
    title: String,
    texts: HashMap<String, String>,
    attributes: HashMap<(String, String), String>,
    page_state: Option<String>,

    behaviour: SimBehaviour,
    quality: QualityTier,
    available: Vec<QualityTier>,
    playing: bool,
    time: f64,
    surface_hidden: bool,

    settings_open: bool,
    submenu_open: bool,
    menu_suppressed: bool,

    visual_mounted: bool,
    theme: Option<BackgroundTheme>,
    language: Option<String>,

    journal: Vec<HostCall>,
}

impl SimState {
    fn apply_quality(&mut self, tier: QualityTier) {
        if tier == QualityTier::Auto {
            self.quality = self.behaviour.auto_quality;
        } else if self.available.contains(&tier) {
            self.quality = tier;
        }
    }

    fn menu_labels(&self) -> Vec<String> {
        let mut tiers: Vec<QualityTier> = self
            .available
            .iter()
            .copied()
            .filter(|tier| *tier != QualityTier::Auto)
            .collect();
        tiers.sort();
        tiers.reverse();

        let mut labels: Vec<String> = tiers.into_iter().map(QualityTier::menu_label).collect();
        labels.push("Auto".to_string());
        labels
    }
}

/// Shared handle to the simulated page. Cloning shares the same page.
#[derive(Debug, Clone)]
pub struct SimulatedHost {
    inner: Arc<Mutex<SimState>>,
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHost {
    /// A blank (non-watch) page with a cooperative player.
    pub fn new() -> Self {
        Self::with_behaviour(SimBehaviour::default())
    }

    pub fn with_behaviour(behaviour: SimBehaviour) -> Self {
        let state = SimState {
            url: "https://www.youtube.com/".to_string(),
            title: "YouTube".to_string(),
            texts: HashMap::new(),
            attributes: HashMap::new(),
            page_state: None,
            quality: behaviour.quality_on_navigation.unwrap_or(QualityTier::Hd720),
            behaviour,
            available: vec![
                QualityTier::Tiny,
                QualityTier::Small,
                QualityTier::Medium,
                QualityTier::Large,
                QualityTier::Hd720,
                QualityTier::Hd1080,
            ],
            playing: false,
            time: 0.0,
            surface_hidden: false,
            settings_open: false,
            submenu_open: false,
            menu_suppressed: false,
            visual_mounted: false,
            theme: None,
            language: None,
            journal: Vec::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bundle this page as both the host page and the substitute visual.
    pub fn host(&self) -> Host {
        Host::new(Arc::new(self.clone()), Arc::new(self.clone()))
    }

    /// Load a new watch page, replacing DOM, page state and player quality.
    pub fn navigate(&self, video: &SimVideo) {
        let mut state = self.lock();

        state.url = format!("https://www.youtube.com/watch?v={}", video.id);
        state.title = format!("{} - YouTube", video.title);

        state.texts.clear();
        state.attributes.clear();
        state
            .texts
            .insert(TITLE_SELECTORS[0].to_string(), video.title.clone());

        if let Some(channel_id) = &video.channel_id {
            let href = if channel_id.starts_with('@') {
                format!("/{}", channel_id)
            } else {
                format!("/channel/{}", channel_id)
            };
            state
                .attributes
                .insert((CHANNEL_LINK_SELECTORS[0].to_string(), "href".to_string()), href);
        }
        if let Some(channel_name) = &video.channel_name {
            state
                .texts
                .insert(CHANNEL_LINK_SELECTORS[0].to_string(), channel_name.clone());
        }

        let page_state = serde_json::json!({
            "videoDetails": {
                "videoId": video.id,
                "title": video.title,
                "channelId": video.channel_id,
                "author": video.channel_name,
            }
        });
        state.page_state = Some(page_state.to_string());

        if let Some(tier) = state.behaviour.quality_on_navigation {
            state.quality = tier;
        }
        state.playing = true;
        state.time = 0.0;
        state.settings_open = false;
        state.submenu_open = false;
    }

    /// Change only the URL (e.g. playlist auto-advance that fires no events).
    pub fn set_url(&self, url: impl Into<String>) {
        self.lock().url = url.into();
    }

    pub fn set_document_title(&self, title: impl Into<String>) {
        self.lock().title = title.into();
    }

    /// Replace the embedded page state with raw (possibly malformed) text.
    pub fn set_page_state(&self, raw: Option<String>) {
        self.lock().page_state = raw;
    }

    /// Remove every queryable element.
    pub fn clear_dom(&self) {
        let mut state = self.lock();
        state.texts.clear();
        state.attributes.clear();
    }

    pub fn set_text(&self, selector: &str, text: impl Into<String>) {
        self.lock().texts.insert(selector.to_string(), text.into());
    }

    pub fn set_attribute(&self, selector: &str, attribute: &str, value: impl Into<String>) {
        self.lock()
            .attributes
            .insert((selector.to_string(), attribute.to_string()), value.into());
    }

    /// Host-side quality change the engine did not ask for (drift).
    pub fn set_quality(&self, tier: QualityTier) {
        self.lock().quality = tier;
    }

    pub fn quality(&self) -> QualityTier {
        self.lock().quality
    }

    pub fn set_available(&self, available: Vec<QualityTier>) {
        self.lock().available = available;
    }

    pub fn set_playing(&self, playing: bool) {
        self.lock().playing = playing;
    }

    pub fn is_playing(&self) -> bool {
        self.lock().playing
    }

    pub fn set_time(&self, seconds: f64) {
        self.lock().time = seconds;
    }

    pub fn update_behaviour<F: FnOnce(&mut SimBehaviour)>(&self, update: F) {
        update(&mut self.lock().behaviour);
    }

    pub fn surface_hidden(&self) -> bool {
        self.lock().surface_hidden
    }

    pub fn visual_mounted(&self) -> bool {
        self.lock().visual_mounted
    }

    pub fn visual_theme(&self) -> Option<BackgroundTheme> {
        self.lock().theme.clone()
    }

    pub fn visual_language(&self) -> Option<String> {
        self.lock().language.clone()
    }

    pub fn menu_suppressed(&self) -> bool {
        self.lock().menu_suppressed
    }

    pub fn menu_open(&self) -> bool {
        let state = self.lock();
        state.settings_open || state.submenu_open
    }

    pub fn journal(&self) -> Vec<HostCall> {
        self.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    /// Number of journal entries matching `predicate`.
    pub fn count<P: Fn(&HostCall) -> bool>(&self, predicate: P) -> usize {
        self.lock().journal.iter().filter(|call| predicate(call)).count()
    }
}

impl HostPage for SimulatedHost {
    fn current_url(&self) -> String {
        self.lock().url.clone()
    }

    fn document_title(&self) -> String {
        self.lock().title.clone()
    }

    fn query_text(&self, selector: &str) -> Option<String> {
        self.lock().texts.get(selector).cloned()
    }

    fn query_attribute(&self, selector: &str, attribute: &str) -> Option<String> {
        self.lock()
            .attributes
            .get(&(selector.to_string(), attribute.to_string()))
            .cloned()
    }

    fn embedded_page_state(&self) -> Option<String> {
        self.lock().page_state.clone()
    }

    fn find_player(&self) -> Option<Arc<dyn PlayerControl>> {
        if !self.lock().behaviour.player_ready {
            return None;
        }
        Some(Arc::new(SimulatedPlayer { host: self.clone() }))
    }

    fn quality_menu(&self) -> Option<Arc<dyn QualityMenu>> {
        if !self.lock().behaviour.menu_available {
            return None;
        }
        Some(Arc::new(SimulatedMenu { host: self.clone() }))
    }
}

impl SubstituteVisual for SimulatedHost {
    fn mount(&self, theme: &BackgroundTheme, language: &str) {
        let mut state = self.lock();
        state.visual_mounted = true;
        state.theme = Some(theme.clone());
        state.language = Some(language.to_string());
        state.journal.push(HostCall::MountVisual);
    }

    fn set_theme(&self, theme: &BackgroundTheme) {
        let mut state = self.lock();
        state.theme = Some(theme.clone());
        state.journal.push(HostCall::SetTheme(theme.clone()));
    }

    fn set_language(&self, language: &str) {
        let mut state = self.lock();
        state.language = Some(language.to_string());
        state.journal.push(HostCall::SetLanguage(language.to_string()));
    }

    fn unmount(&self) {
        let mut state = self.lock();
        state.visual_mounted = false;
        state.journal.push(HostCall::UnmountVisual);
    }
}

/// Player handle returned by [`SimulatedHost::find_player`].
struct SimulatedPlayer {
    host: SimulatedHost,
}

impl PlayerControl for SimulatedPlayer {
    fn set_playback_quality(&self, tier: QualityTier) -> Result<(), HostError> {
        let mut state = self.host.lock();
        state.journal.push(HostCall::SetPlaybackQuality(tier));
        if state.behaviour.honors_playback_quality {
            state.apply_quality(tier);
        }
        Ok(())
    }

    fn set_playback_quality_range(
        &self,
        min: QualityTier,
        max: QualityTier,
    ) -> Result<(), HostError> {
        let mut state = self.host.lock();
        if !state.behaviour.supports_quality_range {
            return Err(HostError::NotSupported("setPlaybackQualityRange"));
        }
        state.journal.push(HostCall::SetPlaybackQualityRange(min, max));
        if state.behaviour.honors_quality_range {
            state.apply_quality(min);
        }
        Ok(())
    }

    fn set_preferred_quality(&self, tier: QualityTier) -> Result<(), HostError> {
        let mut state = self.host.lock();
        state.journal.push(HostCall::SetPreferredQuality(tier));
        if state.behaviour.honors_preferred_quality {
            state.apply_quality(tier);
        }
        Ok(())
    }

    fn playback_quality(&self) -> Option<QualityTier> {
        Some(self.host.lock().quality)
    }

    fn available_qualities(&self) -> Vec<QualityTier> {
        let mut available = self.host.lock().available.clone();
        available.push(QualityTier::Auto);
        available
    }

    fn is_playing(&self) -> bool {
        self.host.lock().playing
    }

    fn current_time(&self) -> f64 {
        self.host.lock().time
    }

    fn play(&self) -> Result<(), HostError> {
        let mut state = self.host.lock();
        state.playing = true;
        state.journal.push(HostCall::Play);
        Ok(())
    }

    fn seek_to(&self, seconds: f64) -> Result<(), HostError> {
        let mut state = self.host.lock();
        state.time = seconds;
        state.journal.push(HostCall::Seek(seconds));
        Ok(())
    }

    fn set_surface_hidden(&self, hidden: bool) {
        let mut state = self.host.lock();
        state.surface_hidden = hidden;
        state.journal.push(HostCall::SurfaceHidden(hidden));
    }
}

/// Menu handle returned by [`SimulatedHost::quality_menu`].
struct SimulatedMenu {
    host: SimulatedHost,
}

impl QualityMenu for SimulatedMenu {
    fn set_suppressed(&self, suppressed: bool) {
        let mut state = self.host.lock();
        state.menu_suppressed = suppressed;
        state.journal.push(HostCall::MenuSuppressed(suppressed));
    }

    fn open_settings(&self) -> Result<(), HostError> {
        let mut state = self.host.lock();
        state.settings_open = true;
        if state.behaviour.menu_pauses_playback && state.playing {
            state.playing = false;
        }
        state.journal.push(HostCall::OpenSettings);
        Ok(())
    }

    fn open_quality_submenu(&self) -> Result<(), HostError> {
        let mut state = self.host.lock();
        if !state.settings_open {
            return Err(HostError::NotReady("settings menu"));
        }
        state.submenu_open = true;
        state.journal.push(HostCall::OpenQualitySubmenu);
        Ok(())
    }

    fn option_labels(&self) -> Vec<String> {
        let state = self.host.lock();
        if !state.submenu_open || !state.behaviour.renders_menu_labels {
            return Vec::new();
        }
        state.menu_labels()
    }

    fn select_option(&self, index: usize) -> Result<(), HostError> {
        let mut state = self.host.lock();
        if !state.submenu_open {
            return Err(HostError::NotReady("quality submenu"));
        }

        let label = state
            .menu_labels()
            .get(index)
            .cloned()
            .ok_or_else(|| HostError::Rejected(format!("no option at index {}", index)))?;

        if let Some(tier) = QualityTier::from_menu_label(&label) {
            state.apply_quality(tier);
        }
        state.settings_open = false;
        state.submenu_open = false;
        state.journal.push(HostCall::SelectOption(label));
        Ok(())
    }

    fn close(&self) {
        let mut state = self.host.lock();
        state.settings_open = false;
        state.submenu_open = false;
        state.journal.push(HostCall::CloseMenu);
    }
}
