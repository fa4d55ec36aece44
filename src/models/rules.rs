use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Whitelisted channel. `id` is a canonical `UC...` id or an `@handle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRule {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub added_at: i64,
}

/// Whitelisted title keyword.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordRule {
    pub text: String,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub added_at: i64,
}

/// A single whitelist entry. Whitelisting is the only supported rule polarity:
/// a match activates audio mode in filtered mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WhitelistRule {
    Channel(ChannelRule),
    Keyword(KeywordRule),
}

impl WhitelistRule {
    pub fn channel(id: impl Into<String>, display_name: impl Into<String>, added_at: i64) -> Self {
        WhitelistRule::Channel(ChannelRule {
            id: id.into(),
            display_name: display_name.into(),
            added_at,
        })
    }

    pub fn keyword(text: impl Into<String>, added_at: i64) -> Self {
        WhitelistRule::Keyword(KeywordRule {
            text: text.into(),
            case_sensitive: false,
            added_at,
        })
    }
}

/// The whitelist as persisted by the popup.
///
/// Channels are unique by id and keywords by their trimmed text. Order carries
/// no meaning for matching; insertion order is kept so the persisted document
/// stays stable between writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRuleSet {
    #[serde(default)]
    channels: IndexMap<String, ChannelRule>,
    #[serde(default)]
    keywords: IndexMap<String, KeywordRule>,
}

impl FilterRuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a rule. Returns `false` when an equivalent rule already exists
    /// or the rule has an empty key.
    pub fn insert(&mut self, rule: WhitelistRule) -> bool {
        match rule {
            WhitelistRule::Channel(channel) => {
                let key = channel.id.trim().to_string();
                if key.is_empty() || self.channels.contains_key(&key) {
                    return false;
                }
                self.channels.insert(key, channel);
                true
            }
            WhitelistRule::Keyword(keyword) => {
                let key = keyword.text.trim().to_string();
                if key.is_empty() || self.keywords.contains_key(&key) {
                    return false;
                }
                self.keywords.insert(key, keyword);
                true
            }
        }
    }

    pub fn remove_channel(&mut self, id: &str) -> Option<ChannelRule> {
        self.channels.shift_remove(id.trim())
    }

    pub fn remove_keyword(&mut self, text: &str) -> Option<KeywordRule> {
        self.keywords.shift_remove(text.trim())
    }

    pub fn contains_channel(&self, id: &str) -> bool {
        self.channels.contains_key(id)
    }

    pub fn channels(&self) -> impl Iterator<Item = &ChannelRule> {
        self.channels.values()
    }

    pub fn keywords(&self) -> impl Iterator<Item = &KeywordRule> {
        self.keywords.values()
    }

    pub fn len(&self) -> usize {
        self.channels.len() + self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.keywords.is_empty()
    }
}

impl FromIterator<WhitelistRule> for FilterRuleSet {
    fn from_iter<I: IntoIterator<Item = WhitelistRule>>(iter: I) -> Self {
        let mut set = FilterRuleSet::new();
        for rule in iter {
            set.insert(rule);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_rejects_duplicates() {
        let mut rules = FilterRuleSet::new();

        assert!(rules.insert(WhitelistRule::channel("UC1", "One", 0)));
        assert!(!rules.insert(WhitelistRule::channel("UC1", "Renamed", 5)));
        assert!(rules.insert(WhitelistRule::keyword("podcast", 0)));
        assert!(!rules.insert(WhitelistRule::keyword("  podcast ", 1)));

        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn test_insert_rejects_empty_keys() {
        let mut rules = FilterRuleSet::new();
        assert!(!rules.insert(WhitelistRule::keyword("   ", 0)));
        assert!(!rules.insert(WhitelistRule::channel("", "", 0)));
        assert!(rules.is_empty());
    }

    #[test]
    fn test_remove_rules() {
        let mut rules: FilterRuleSet = vec![
            WhitelistRule::channel("UC1", "One", 0),
            WhitelistRule::keyword("lofi", 0),
        ]
        .into_iter()
        .collect();

        assert!(rules.remove_channel("UC1").is_some());
        assert!(rules.remove_keyword("lofi").is_some());
        assert!(rules.remove_keyword("lofi").is_none());
        assert!(rules.is_empty());
    }

    #[test]
    fn test_rule_serialization_shape() {
        let rule = WhitelistRule::channel("UC1", "One", 42);
        let json = serde_json::to_value(&rule).unwrap();

        assert_eq!(json["kind"], "channel");
        assert_eq!(json["displayName"], "One");
        assert_eq!(json["addedAt"], 42);
    }
}
