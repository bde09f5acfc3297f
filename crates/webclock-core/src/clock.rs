//! Time sources and day-key derivation.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;

/// Format of a day-key (`YYYY-MM-DD`).
pub const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

/// Source of wall-clock time for the tracker.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Cloning shares the underlying instant, so a test can keep one copy
/// and hand the other to the tracker.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Moves the clock forward by whole seconds.
    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += Duration::seconds(secs);
    }

    /// Jumps to an absolute instant.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Calendar date of `at` in the reference timezone.
#[must_use]
pub fn local_date(at: DateTime<Utc>, tz: Tz) -> NaiveDate {
    at.with_timezone(&tz).date_naive()
}

/// Day-key of `at` in the reference timezone.
#[must_use]
pub fn day_key(at: DateTime<Utc>, tz: Tz) -> String {
    date_key(local_date(at, tz))
}

/// Formats a calendar date as a day-key.
#[must_use]
pub fn date_key(date: NaiveDate) -> String {
    date.format(DAY_KEY_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_day_key_utc() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 59).unwrap();
        assert_eq!(day_key(at, chrono_tz::UTC), "2024-03-09");
    }

    #[test]
    fn test_day_key_respects_timezone() {
        // 23:30 UTC is already the next day in Tokyo
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 23, 30, 0).unwrap();
        assert_eq!(day_key(at, chrono_tz::Asia::Tokyo), "2024-03-10");
        assert_eq!(day_key(at, chrono_tz::America::New_York), "2024-03-09");
    }

    #[test]
    fn test_manual_clock_shares_time() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let handed_out = clock.clone();

        clock.advance_secs(42);
        assert_eq!(handed_out.now(), start + Duration::seconds(42));

        clock.set(start);
        assert_eq!(handed_out.now(), start);
    }
}
