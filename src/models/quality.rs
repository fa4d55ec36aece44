use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Tier the engine pins playback to while audio mode is enabled.
pub const AUDIO_TARGET: QualityTier = QualityTier::Tiny;

/// Tier used for restore when neither a saved nor a preferred tier qualifies.
pub const FALLBACK_RESTORE_TIER: QualityTier = QualityTier::Hd720;

/// Discrete playback quality level as reported by the host player.
///
/// The serialized names match the host's quality keys (`"tiny"`, `"hd720"`, ...).
/// Variants are declared from lowest to highest so the derived ordering can be
/// used for "lowest available" selection; `Auto` sorts last and is never
/// considered a concrete tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Tiny,
    Small,
    Medium,
    Large,
    Hd720,
    Hd1080,
    Hd1440,
    Hd2160,
    Auto,
}

impl QualityTier {
    /// Every tier, lowest first.
    pub const ALL: [QualityTier; 9] = [
        QualityTier::Tiny,
        QualityTier::Small,
        QualityTier::Medium,
        QualityTier::Large,
        QualityTier::Hd720,
        QualityTier::Hd1080,
        QualityTier::Hd1440,
        QualityTier::Hd2160,
        QualityTier::Auto,
    ];

    /// Host quality key (`"tiny"`, `"hd1080"`, `"auto"`).
    pub fn host_key(self) -> &'static str {
        match self {
            QualityTier::Tiny => "tiny",
            QualityTier::Small => "small",
            QualityTier::Medium => "medium",
            QualityTier::Large => "large",
            QualityTier::Hd720 => "hd720",
            QualityTier::Hd1080 => "hd1080",
            QualityTier::Hd1440 => "hd1440",
            QualityTier::Hd2160 => "hd2160",
            QualityTier::Auto => "auto",
        }
    }

    pub fn from_host_key(key: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.host_key().eq_ignore_ascii_case(key.trim()))
    }

    /// Vertical resolution in pixels, `None` for `Auto`.
    pub fn height(self) -> Option<u32> {
        match self {
            QualityTier::Tiny => Some(144),
            QualityTier::Small => Some(240),
            QualityTier::Medium => Some(360),
            QualityTier::Large => Some(480),
            QualityTier::Hd720 => Some(720),
            QualityTier::Hd1080 => Some(1080),
            QualityTier::Hd1440 => Some(1440),
            QualityTier::Hd2160 => Some(2160),
            QualityTier::Auto => None,
        }
    }

    pub fn from_height(height: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|tier| tier.height() == Some(height))
    }

    /// Label as rendered in the host's quality menu (`"144p"`, `"Auto"`).
    pub fn menu_label(self) -> String {
        match self.height() {
            Some(height) => format!("{}p", height),
            None => "Auto".to_string(),
        }
    }

    /// Parse a rendered menu label such as `"1080p60 HD"`, `"144p"` or `"Auto (480p)"`.
    ///
    /// Labels starting with "Auto" always map to [`QualityTier::Auto`], even when
    /// the host appends the currently resolved resolution.
    pub fn from_menu_label(label: &str) -> Option<Self> {
        static LABEL_PATTERN: OnceLock<Regex> = OnceLock::new();

        let label = label.trim();
        if label.to_ascii_lowercase().starts_with("auto") {
            return Some(QualityTier::Auto);
        }

        let pattern = LABEL_PATTERN
            .get_or_init(|| Regex::new(r"(\d{3,4})p").expect("Invalid quality label regex"));
        let height = pattern.captures(label)?.get(1)?.as_str().parse().ok()?;
        Self::from_height(height)
    }

    /// Tiers that audio mode pins to. Restore must never resolve into one of these.
    pub fn is_audio_tier(self) -> bool {
        matches!(self, QualityTier::Tiny | QualityTier::Small)
    }

    /// Lowest concrete tier in `available`: `Tiny` when offered, otherwise the
    /// lowest tier the host enumerates.
    pub fn lowest_available(available: &[QualityTier]) -> Option<QualityTier> {
        available
            .iter()
            .copied()
            .filter(|tier| *tier != QualityTier::Auto)
            .min()
    }

    /// Closest concrete tier to `target` in `available`, preferring the highest
    /// tier that does not exceed it.
    pub fn closest_available(
        target: QualityTier,
        available: &[QualityTier],
    ) -> Option<QualityTier> {
        let concrete = available.iter().copied().filter(|tier| *tier != QualityTier::Auto);
        concrete
            .clone()
            .filter(|tier| *tier <= target)
            .max()
            .or_else(|| concrete.min())
    }

    /// Stand-in for a restore `target` the host does not offer: the closest
    /// tier outside the audio tiers, then `Auto`. An audio tier is returned
    /// only when the host offers nothing else.
    pub fn restore_substitute(
        target: QualityTier,
        available: &[QualityTier],
    ) -> Option<QualityTier> {
        let full: Vec<QualityTier> = available
            .iter()
            .copied()
            .filter(|tier| *tier != QualityTier::Auto && !tier.is_audio_tier())
            .collect();

        Self::closest_available(target, &full)
            .or_else(|| available.contains(&QualityTier::Auto).then_some(QualityTier::Auto))
            .or_else(|| Self::closest_available(target, available))
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.host_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_key_round_trip_names() {
        assert_eq!(QualityTier::from_host_key("hd720"), Some(QualityTier::Hd720));
        assert_eq!(QualityTier::from_host_key(" TINY "), Some(QualityTier::Tiny));
        assert_eq!(QualityTier::from_host_key("highres"), None);
    }

    #[test]
    fn test_serde_uses_host_keys() {
        let json = serde_json::to_string(&QualityTier::Hd1080).unwrap();
        assert_eq!(json, "\"hd1080\"");

        let parsed: QualityTier = serde_json::from_str("\"small\"").unwrap();
        assert_eq!(parsed, QualityTier::Small);
    }

    #[test]
    fn test_menu_label_parsing() {
        assert_eq!(QualityTier::from_menu_label("144p"), Some(QualityTier::Tiny));
        assert_eq!(QualityTier::from_menu_label("1080p60 HD"), Some(QualityTier::Hd1080));
        assert_eq!(QualityTier::from_menu_label("2160p 4K"), Some(QualityTier::Hd2160));
        assert_eq!(QualityTier::from_menu_label("Auto (480p)"), Some(QualityTier::Auto));
        assert_eq!(QualityTier::from_menu_label("Premium"), None);
    }

    #[test]
    fn test_lowest_available_prefers_tiny() {
        let available = [
            QualityTier::Hd720,
            QualityTier::Tiny,
            QualityTier::Medium,
            QualityTier::Auto,
        ];
        assert_eq!(QualityTier::lowest_available(&available), Some(QualityTier::Tiny));

        let no_tiny = [QualityTier::Hd1080, QualityTier::Small, QualityTier::Auto];
        assert_eq!(QualityTier::lowest_available(&no_tiny), Some(QualityTier::Small));

        assert_eq!(QualityTier::lowest_available(&[QualityTier::Auto]), None);
    }

    #[test]
    fn test_closest_available() {
        let available = [QualityTier::Medium, QualityTier::Hd1080];
        assert_eq!(
            QualityTier::closest_available(QualityTier::Hd720, &available),
            Some(QualityTier::Medium)
        );
        assert_eq!(
            QualityTier::closest_available(QualityTier::Tiny, &available),
            Some(QualityTier::Medium)
        );
    }

    #[test]
    fn test_restore_substitute_skips_audio_tiers() {
        use QualityTier::*;

        let substitute =
            |available: &[QualityTier]| QualityTier::restore_substitute(Hd720, available);

        // Nothing between the audio tiers and the target: go up, not down
        assert_eq!(substitute(&[Tiny, Small, Hd1080]), Some(Hd1080));
        assert_eq!(substitute(&[Tiny, Small, Medium, Hd1080]), Some(Medium));
        assert_eq!(substitute(&[Tiny, Small, Auto]), Some(Auto));
        // Audio-only item: nothing better exists
        assert_eq!(substitute(&[Tiny, Small]), Some(Small));
        assert_eq!(substitute(&[]), None);
    }

    #[test]
    fn test_audio_tiers() {
        assert!(QualityTier::Tiny.is_audio_tier());
        assert!(QualityTier::Small.is_audio_tier());
        assert!(!QualityTier::Medium.is_audio_tier());
        assert!(!QualityTier::Auto.is_audio_tier());
    }
}
