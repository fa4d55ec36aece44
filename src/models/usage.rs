use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Per-day accumulators consumed by the statistics view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCounters {
    /// Seconds audio mode was enabled while the media was actually playing.
    pub listened_seconds: u64,
    /// Seconds audio mode was enabled, playing or not.
    pub active_seconds: u64,
}

/// Append-only usage ledger keyed by local calendar date (`YYYY-MM-DD`).
///
/// The engine only ever adds to existing days; pruning old days is left to
/// whoever owns the statistics view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageLedger {
    days: IndexMap<String, UsageCounters>,
}

impl UsageLedger {
    pub fn date_key(date: NaiveDate) -> String {
        date.format("%Y-%m-%d").to_string()
    }

    pub fn record(
        &mut self,
        date: NaiveDate,
        listened_seconds: u64,
        active_seconds: u64,
    ) -> UsageCounters {
        let counters = self.days.entry(Self::date_key(date)).or_default();
        counters.listened_seconds = counters.listened_seconds.saturating_add(listened_seconds);
        counters.active_seconds = counters.active_seconds.saturating_add(active_seconds);
        *counters
    }

    pub fn get(&self, date: NaiveDate) -> Option<UsageCounters> {
        self.days.get(&Self::date_key(date)).copied()
    }

    pub fn days(&self) -> impl Iterator<Item = (&str, &UsageCounters)> {
        self.days.iter().map(|(date, counters)| (date.as_str(), counters))
    }

    pub fn total(&self) -> UsageCounters {
        self.days.values().fold(UsageCounters::default(), |acc, day| UsageCounters {
            listened_seconds: acc.listened_seconds + day.listened_seconds,
            active_seconds: acc.active_seconds + day.active_seconds,
        })
    }
}
