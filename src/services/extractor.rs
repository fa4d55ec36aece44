//! Video identity extraction from the host page.
//!
//! Strategies are tried in order, each one only filling fields the previous
//! ones left empty:
//!
//! 1. Structured DOM queries over several candidate selectors
//! 2. The embedded page-state JSON (`videoDetails`)
//! 3. The document title
//!
//! The video id itself comes from the URL (`?v=` or `/shorts/`) and falls back
//! to the page-state JSON. Without a video id there is no identity.

use crate::host::HostPage;
use crate::models::VideoIdentity;
use regex::Regex;
use serde::Deserialize;

/// Candidate selectors for the title heading, newest host layout first.
pub const TITLE_SELECTORS: &[&str] = &[
    "h1.ytd-watch-metadata yt-formatted-string",
    "h1.title.ytd-video-primary-info-renderer",
    "#title h1",
];

/// Candidate selectors for the owner channel link (`href` and link text).
pub const CHANNEL_LINK_SELECTORS: &[&str] = &[
    "ytd-video-owner-renderer ytd-channel-name a",
    "#owner #channel-name a",
    "#upload-info a.yt-simple-endpoint",
];

/// Microdata element carrying the canonical channel id in `content`.
pub const CHANNEL_ID_META_SELECTOR: &str = "meta[itemprop=\"channelId\"]";

const TITLE_SUFFIX: &str = " - YouTube";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageState {
    video_details: Option<VideoDetails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoDetails {
    video_id: Option<String>,
    title: Option<String>,
    channel_id: Option<String>,
    author: Option<String>,
}

/// Reads the identity of the item currently on screen.
///
/// Patterns are compiled once at construction; the extractor itself holds no
/// page state and can be shared freely.
pub struct VideoInfoExtractor {
    /// `v=` query parameter of a watch URL
    watch_id_pattern: Regex,

    /// `/shorts/<id>` path segment
    shorts_id_pattern: Regex,

    /// `/channel/UC...` link path
    channel_path_pattern: Regex,

    /// `@handle` in a link path or bare
    handle_pattern: Regex,

    /// Unread-notification prefix the host puts in the document title, e.g. `(3) `
    title_counter_pattern: Regex,
}

impl VideoInfoExtractor {
    pub fn new() -> Self {
        Self {
            watch_id_pattern: Regex::new(r"[?&]v=([A-Za-z0-9_-]{11})")
                .expect("Invalid watch id regex"),
            shorts_id_pattern: Regex::new(r"/shorts/([A-Za-z0-9_-]{11})")
                .expect("Invalid shorts id regex"),
            channel_path_pattern: Regex::new(r"(?:^|/)channel/(UC[A-Za-z0-9_-]+)")
                .expect("Invalid channel path regex"),
            handle_pattern: Regex::new(r"(?:^|/)(@[\w.\-]+)").expect("Invalid handle regex"),
            title_counter_pattern: Regex::new(r"^\(\d+\)\s*").expect("Invalid title counter regex"),
        }
    }

    /// Video id encoded in a page URL, if it is a watch or shorts URL.
    pub fn video_id_from_url(&self, url: &str) -> Option<String> {
        self.watch_id_pattern
            .captures(url)
            .or_else(|| self.shorts_id_pattern.captures(url))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Normalize a channel reference to a stable key.
    ///
    /// Canonical `UC...` ids are preferred. Otherwise an `@handle` is accepted;
    /// handles can be renamed, so rules keyed by a handle stop matching after a
    /// rename.
    pub fn normalize_channel_id(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if let Some(caps) = self.channel_path_pattern.captures(raw) {
            return Some(caps[1].to_string());
        }
        if raw.starts_with("UC")
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Some(raw.to_string());
        }
        self.handle_pattern
            .captures(raw)
            .map(|caps| caps[1].to_string())
    }

    /// Extract the current identity.
    ///
    /// # Returns
    /// `None` only when no video id can be found (not a watch page)
    pub fn extract(&self, page: &dyn HostPage) -> Option<VideoIdentity> {
        let url_id = self.video_id_from_url(&page.current_url());
        let details = self.page_state_details(page);

        let video_id = url_id.or_else(|| details.as_ref().and_then(|d| d.video_id.clone()))?;

        // The embedded blob is only written on full page loads; after an
        // in-app navigation it still describes the first item.
        let details = details.filter(|d| d.video_id.as_deref().is_none_or(|id| id == video_id));

        let mut identity = VideoIdentity::new(video_id);
        self.apply_dom(page, &mut identity);
        if let Some(details) = details {
            self.apply_page_state(details, &mut identity);
        }
        self.apply_document_title(page, &mut identity);

        tracing::debug!(
            "Extracted video {} (title: {}, channel: {:?})",
            identity.video_id,
            !identity.title.is_empty(),
            identity.channel_id
        );
        Some(identity)
    }

    fn apply_dom(&self, page: &dyn HostPage, identity: &mut VideoIdentity) {
        if let Some(title) = TITLE_SELECTORS
            .iter()
            .filter_map(|selector| page.query_text(selector))
            .map(|text| text.trim().to_string())
            .find(|text| !text.is_empty())
        {
            identity.title = title;
        }

        for selector in CHANNEL_LINK_SELECTORS {
            let Some(channel_id) = page
                .query_attribute(selector, "href")
                .and_then(|href| self.normalize_channel_id(&href))
            else {
                continue;
            };

            identity.channel_id = Some(channel_id);
            identity.channel_name = page
                .query_text(selector)
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty());
            break;
        }

        // Prefer the canonical id over a handle when microdata has one.
        if identity.channel_id.as_deref().is_none_or(|id| id.starts_with('@'))
            && let Some(canonical) = page
                .query_attribute(CHANNEL_ID_META_SELECTOR, "content")
                .and_then(|content| self.normalize_channel_id(&content))
                .filter(|id| id.starts_with("UC"))
        {
            identity.channel_id = Some(canonical);
        }
    }

    fn page_state_details(&self, page: &dyn HostPage) -> Option<VideoDetails> {
        let raw = page.embedded_page_state()?;
        match serde_json::from_str::<PageState>(&raw) {
            Ok(state) => state.video_details,
            Err(e) => {
                tracing::debug!("Skipping malformed page state: {}", e);
                None
            }
        }
    }

    fn apply_page_state(&self, details: VideoDetails, identity: &mut VideoIdentity) {
        if identity.title.is_empty()
            && let Some(title) = details.title.filter(|t| !t.trim().is_empty())
        {
            identity.title = title.trim().to_string();
        }

        if identity.channel_id.is_none() {
            identity.channel_id = details
                .channel_id
                .as_deref()
                .and_then(|id| self.normalize_channel_id(id));
        }

        if identity.channel_name.is_none() {
            identity.channel_name = details.author.filter(|a| !a.trim().is_empty());
        }
    }

    fn apply_document_title(&self, page: &dyn HostPage, identity: &mut VideoIdentity) {
        if !identity.title.is_empty() {
            return;
        }

        let document_title = page.document_title();
        let without_counter = self.title_counter_pattern.replace(document_title.trim(), "");
        let without_counter: &str = &without_counter;
        let title = without_counter
            .strip_suffix(TITLE_SUFFIX)
            .unwrap_or(without_counter)
            .trim();

        // The bare site name is what the host shows between items.
        if !title.is_empty() && title != "YouTube" {
            identity.title = title.to_string();
        }
    }
}

impl Default for VideoInfoExtractor {
    fn default() -> Self {
        Self::new()
    }
}
