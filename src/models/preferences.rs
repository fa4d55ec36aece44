use crate::models::{FilterRuleSet, QualityTier};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Process-wide operating mode selected by the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// Audio mode on every video.
    #[default]
    Always,
    /// Audio mode only on videos matching the whitelist.
    Filtered,
    /// Audio mode never; the user's preferred quality is still applied.
    Off,
}

impl OperatingMode {
    /// Text shown on the toolbar badge.
    pub fn badge_text(self) -> &'static str {
        match self {
            OperatingMode::Always => "ON",
            OperatingMode::Filtered => "AUTO",
            OperatingMode::Off => "",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperatingMode::Always => "always",
            OperatingMode::Filtered => "filtered",
            OperatingMode::Off => "off",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeKind {
    #[default]
    Color,
    Gradient,
    Image,
}

/// Background of the substitute visual. `value` is a CSS colour, a gradient
/// expression or an image URL depending on `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundTheme {
    #[serde(rename = "type")]
    pub kind: ThemeKind,
    pub value: String,
}

impl Default for BackgroundTheme {
    fn default() -> Self {
        Self {
            kind: ThemeKind::Color,
            value: "#0f0f0f".to_string(),
        }
    }
}

pub const DEFAULT_LANGUAGE: &str = "en";

/// Typed snapshot of everything the popup persists for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preferences {
    pub mode: OperatingMode,
    pub rules: FilterRuleSet,
    /// `None` when the user never picked a general quality.
    pub preferred_quality: Option<QualityTier>,
    pub theme: BackgroundTheme,
    pub language: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            mode: OperatingMode::default(),
            rules: FilterRuleSet::default(),
            preferred_quality: None,
            theme: BackgroundTheme::default(),
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}
