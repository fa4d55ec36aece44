use crate::models::{FilterRuleSet, VideoIdentity};

/// Which rule made a video match, for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchReason {
    Channel(String),
    Keyword(String),
}

/// Whether audio mode should be active for `video` under `rules`.
///
/// A channel rule matches on exact id equality, a keyword rule on a substring
/// of the title (case-insensitive unless the rule says otherwise). A rule whose
/// field is missing on the video never matches.
pub fn matches(video: &VideoIdentity, rules: &FilterRuleSet) -> bool {
    matches_with_reason(video, rules).is_some()
}

/// Like [`matches`], returning the first rule that matched.
pub fn matches_with_reason(video: &VideoIdentity, rules: &FilterRuleSet) -> Option<MatchReason> {
    if let Some(channel_id) = video.channel_id.as_deref().filter(|id| !id.is_empty())
        && rules.contains_channel(channel_id)
    {
        return Some(MatchReason::Channel(channel_id.to_string()));
    }

    let title = video.title()?;
    let folded_title = title.to_lowercase();

    rules
        .keywords()
        .find(|rule| {
            let text = rule.text.trim();
            if text.is_empty() {
                return false;
            }
            if rule.case_sensitive {
                title.contains(text)
            } else {
                folded_title.contains(&text.to_lowercase())
            }
        })
        .map(|rule| MatchReason::Keyword(rule.text.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{KeywordRule, WhitelistRule};
    use proptest::prelude::*;

    fn video(channel: Option<&str>, title: &str) -> VideoIdentity {
        let mut video = VideoIdentity::new("vidAAAAAAAA").with_title(title);
        video.channel_id = channel.map(str::to_string);
        video
    }

    #[test]
    fn test_empty_rules_never_match() {
        let rules = FilterRuleSet::new();
        assert!(!matches(&video(Some("UC1"), "Lo-fi beats"), &rules));
    }

    #[test]
    fn test_channel_match_is_exact() {
        let rules: FilterRuleSet = [WhitelistRule::channel("UC1", "One", 0)].into_iter().collect();

        assert_eq!(
            matches_with_reason(&video(Some("UC1"), ""), &rules),
            Some(MatchReason::Channel("UC1".to_string()))
        );
        assert!(!matches(&video(Some("uc1"), ""), &rules));
        assert!(!matches(&video(Some("UC12"), ""), &rules));
        assert!(!matches(&video(None, ""), &rules));
    }

    #[test]
    fn test_keyword_case_insensitive_by_default() {
        let rules: FilterRuleSet = [WhitelistRule::keyword("Podcast", 0)].into_iter().collect();

        assert!(matches(&video(None, "Weekly PODCAST #12"), &rules));
        assert!(!matches(&video(None, "Weekly show"), &rules));
        assert!(!matches(&video(None, ""), &rules));
    }

    #[test]
    fn test_keyword_case_sensitive() {
        let rules: FilterRuleSet = [WhitelistRule::Keyword(KeywordRule {
            text: "ASMR".to_string(),
            case_sensitive: true,
            added_at: 0,
        })]
        .into_iter()
        .collect();

        assert!(matches(&video(None, "ASMR rain"), &rules));
        assert!(!matches(&video(None, "asmr rain"), &rules));
    }

    #[test]
    fn test_channel_checked_before_keywords() {
        let rules: FilterRuleSet = [
            WhitelistRule::keyword("mix", 0),
            WhitelistRule::channel("UC1", "One", 0),
        ]
        .into_iter()
        .collect();

        assert_eq!(
            matches_with_reason(&video(Some("UC1"), "summer mix"), &rules),
            Some(MatchReason::Channel("UC1".to_string()))
        );
    }

    proptest! {
        #[test]
        fn prop_matches_iff_channel_or_keyword(
            channels in proptest::collection::vec("UC[a-z0-9]{1,4}", 0..4),
            keywords in proptest::collection::vec("[a-zA-Z]{1,4}", 0..4),
            channel in proptest::option::of("UC[a-z0-9]{1,4}"),
            title in "[a-zA-Z ]{0,24}",
        ) {
            let rules: FilterRuleSet = channels
                .iter()
                .map(|id| WhitelistRule::channel(id.clone(), "", 0))
                .chain(keywords.iter().map(|text| WhitelistRule::keyword(text.clone(), 0)))
                .collect();
            let video = video(channel.as_deref(), &title);

            let expected = channel.as_ref().is_some_and(|id| channels.contains(id))
                || keywords
                    .iter()
                    .any(|k| title.to_lowercase().contains(&k.to_lowercase()));

            prop_assert_eq!(matches(&video, &rules), expected);
        }

        #[test]
        fn prop_empty_rules_never_match(
            channel in proptest::option::of("UC[a-z0-9]{1,4}"),
            title in ".{0,24}",
        ) {
            prop_assert!(!matches(&video(channel.as_deref(), &title), &FilterRuleSet::new()));
        }
    }
}
