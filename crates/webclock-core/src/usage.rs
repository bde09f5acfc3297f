//! Daily usage tables and their merge algebra.
//!
//! A [`UsageTable`] maps day-key → domain → [`DomainRecord`]. The same
//! shape serves as the durable cumulative table and as the in-memory
//! buffer of deltas, so flushing is a single [`UsageTable::merge`].
//!
//! Merging is plain addition on every counter: associative, commutative,
//! and never decreasing. Counters saturate instead of wrapping.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::clock::date_key;
use crate::error::{DomainError, DomainResult};
use crate::settings::Settings;

// ============================================================================
// Domain Record
// ============================================================================

/// Cumulative usage of one domain on one day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    /// Total whole seconds attributed to the domain
    #[serde(default)]
    pub seconds: u64,

    /// Number of closed sessions that contributed time
    #[serde(default)]
    pub visits: u64,

    /// Seconds per exact resource; sums to `seconds`
    #[serde(default)]
    pub pages: BTreeMap<String, u64>,
}

impl DomainRecord {
    /// Adds one visit worth `seconds` spent on `resource`.
    pub fn add_visit(&mut self, seconds: u64, resource: &str) {
        self.seconds = self.seconds.saturating_add(seconds);
        self.visits = self.visits.saturating_add(1);
        let page = self.pages.entry(resource.to_string()).or_insert(0);
        *page = page.saturating_add(seconds);
    }

    /// Adds every counter of `other` into this record.
    pub fn absorb(&mut self, other: &DomainRecord) {
        self.seconds = self.seconds.saturating_add(other.seconds);
        self.visits = self.visits.saturating_add(other.visits);
        for (resource, seconds) in &other.pages {
            let page = self.pages.entry(resource.clone()).or_insert(0);
            *page = page.saturating_add(*seconds);
        }
    }

    /// Sum of all per-resource seconds.
    #[must_use]
    pub fn pages_total(&self) -> u64 {
        self.pages.values().fold(0u64, |acc, s| acc.saturating_add(*s))
    }

    /// Returns true if the per-resource breakdown accounts for every second.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.pages_total() == self.seconds
    }
}

/// Usage of every domain on one day.
pub type DayUsage = BTreeMap<String, DomainRecord>;

// ============================================================================
// Usage Table
// ============================================================================

/// Usage history bucketed by day-key, then by domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageTable(BTreeMap<String, DayUsage>);

impl UsageTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the table holds no records at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeMap::is_empty)
    }

    /// Records one closed session, creating nested records lazily.
    pub fn record(&mut self, day_key: &str, domain: &str, seconds: u64, resource: &str) {
        self.0
            .entry(day_key.to_string())
            .or_default()
            .entry(domain.to_string())
            .or_default()
            .add_visit(seconds, resource);
    }

    /// Adds every record of `other` into this table.
    pub fn merge(&mut self, other: &UsageTable) {
        for (day_key, domains) in &other.0 {
            let day = self.0.entry(day_key.clone()).or_default();
            for (domain, record) in domains {
                day.entry(domain.clone()).or_default().absorb(record);
            }
        }
    }

    /// Returns one day's usage, if any was recorded.
    pub fn day(&self, day_key: &str) -> Option<&DayUsage> {
        self.0.get(day_key)
    }

    /// Returns one domain's record on one day.
    pub fn get(&self, day_key: &str, domain: &str) -> Option<&DomainRecord> {
        self.0.get(day_key).and_then(|day| day.get(domain))
    }

    /// Iterates days in ascending day-key order.
    pub fn days(&self) -> impl Iterator<Item = (&String, &DayUsage)> {
        self.0.iter()
    }

    /// Number of distinct day-keys.
    #[must_use]
    pub fn day_count(&self) -> usize {
        self.0.len()
    }

    /// Number of day × domain records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    /// Total seconds across the whole table.
    #[must_use]
    pub fn total_seconds(&self) -> u64 {
        self.0
            .values()
            .flat_map(BTreeMap::values)
            .fold(0u64, |acc, r| acc.saturating_add(r.seconds))
    }

    /// Seconds per domain on one day (what limit evaluation needs).
    #[must_use]
    pub fn seconds_on(&self, day_key: &str) -> BTreeMap<String, u64> {
        self.day(day_key)
            .map(|day| {
                day.iter()
                    .map(|(domain, record)| (domain.clone(), record.seconds))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Aggregates seconds and visits per domain over a range ending `today`.
    #[must_use]
    pub fn totals(&self, range: UsageRange, today: NaiveDate) -> RangeTotals {
        let mut totals = RangeTotals {
            range,
            ..RangeTotals::default()
        };

        match range.days() {
            Some(days) => {
                for offset in 0..days {
                    let key = date_key(today - Duration::days(i64::from(offset)));
                    if let Some(day) = self.day(&key) {
                        totals.add_day(day);
                    }
                }
            }
            None => {
                for day in self.0.values() {
                    totals.add_day(day);
                }
            }
        }

        totals
    }

    /// Checks the `sum(pages) == seconds` invariant for every record.
    pub fn validate(&self) -> DomainResult<()> {
        for (day_key, domains) in &self.0 {
            for (domain, record) in domains {
                if !record.is_consistent() {
                    return Err(DomainError::snapshot(format!(
                        "{day_key}/{domain}: pages sum to {} but seconds is {}",
                        record.pages_total(),
                        record.seconds
                    )));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Range Totals
// ============================================================================

/// Date range used when summing usage across days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UsageRange {
    #[default]
    #[serde(rename = "today")]
    Today,
    #[serde(rename = "7days")]
    Last7Days,
    #[serde(rename = "30days")]
    Last30Days,
    #[serde(rename = "all")]
    All,
}

impl UsageRange {
    /// Number of day-keys covered, or `None` for the whole history.
    #[must_use]
    pub fn days(&self) -> Option<u32> {
        match self {
            Self::Today => Some(1),
            Self::Last7Days => Some(7),
            Self::Last30Days => Some(30),
            Self::All => None,
        }
    }

    /// Parses the labels used on the command line.
    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "today" => Ok(Self::Today),
            "7days" | "7d" => Ok(Self::Last7Days),
            "30days" | "30d" => Ok(Self::Last30Days),
            "all" => Ok(Self::All),
            other => Err(DomainError::ParseError {
                field: "range".to_string(),
                reason: format!("unknown range '{other}' (expected today, 7days, 30days or all)"),
            }),
        }
    }
}

impl fmt::Display for UsageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Today => write!(f, "today"),
            Self::Last7Days => write!(f, "7days"),
            Self::Last30Days => write!(f, "30days"),
            Self::All => write!(f, "all"),
        }
    }
}

/// Seconds and visits of one domain summed over a range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainTotals {
    pub seconds: u64,
    pub visits: u64,
}

/// Per-domain totals over a range, plus the grand total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeTotals {
    pub range: UsageRange,
    pub domains: BTreeMap<String, DomainTotals>,
    pub total_seconds: u64,
}

impl RangeTotals {
    fn add_day(&mut self, day: &DayUsage) {
        for (domain, record) in day {
            let entry = self.domains.entry(domain.clone()).or_default();
            entry.seconds = entry.seconds.saturating_add(record.seconds);
            entry.visits = entry.visits.saturating_add(record.visits);
            self.total_seconds = self.total_seconds.saturating_add(record.seconds);
        }
    }

    /// Domains sorted by time spent, longest first.
    #[must_use]
    pub fn ranked(&self) -> Vec<(&String, &DomainTotals)> {
        let mut entries: Vec<_> = self.domains.iter().collect();
        entries.sort_by(|a, b| b.1.seconds.cmp(&a.1.seconds).then_with(|| a.0.cmp(b.0)));
        entries
    }
}

/// Response to a "today's stats" query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodayStats {
    pub day_key: String,
    pub usage: UsageTable,
    pub settings: Settings,
}

/// Formats whole seconds as `HH:MM:SS`.
#[must_use]
pub fn format_hms(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
