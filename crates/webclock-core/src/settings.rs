//! User settings with defaults and partial-override merging.
//!
//! Stored settings are read leniently: a key with the wrong type falls
//! back to its default so that one bad value never resets the others.
//! Overrides sent by a client are checked strictly and rejected whole.

use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{DomainError, DomainResult};

/// Default idle detection threshold in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

/// Default period between periodic flushes in seconds.
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 60;

/// Default number of days of history worth keeping.
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Default reference timezone for day-keys.
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Smallest idle threshold the host idle detector accepts.
pub const MIN_IDLE_TIMEOUT_SECS: u64 = 15;

/// Tracker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub idle_timeout_seconds: u64,
    pub tracking_paused: bool,
    /// IANA zone name used to derive day-keys
    pub timezone: String,
    pub retention_days: u32,
    pub flush_interval_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: DEFAULT_IDLE_TIMEOUT_SECS,
            tracking_paused: false,
            timezone: DEFAULT_TIMEZONE.to_string(),
            retention_days: DEFAULT_RETENTION_DAYS,
            flush_interval_seconds: DEFAULT_FLUSH_INTERVAL_SECS,
        }
    }
}

impl Settings {
    /// Builds settings from a stored record, keeping defaults for anything
    /// missing or malformed.
    pub fn from_stored(stored: Option<&Value>) -> Self {
        let mut settings = Self::default();
        let Some(Value::Object(map)) = stored else {
            if let Some(other) = stored {
                warn!(value = %other, "stored settings are not an object, using defaults");
            }
            return settings;
        };

        for (key, value) in map {
            if let Err(e) = settings.apply(key, value) {
                warn!(key = %key, error = %e, "ignoring stored setting");
            }
        }
        settings
    }

    /// Returns a copy with `overrides` applied.
    ///
    /// Unknown keys are ignored. A known key with the wrong type or an
    /// out-of-range value fails the whole merge.
    pub fn merged(&self, overrides: &Map<String, Value>) -> DomainResult<Self> {
        let mut next = self.clone();
        for (key, value) in overrides {
            next.apply(key, value)?;
        }
        Ok(next)
    }

    /// Checks values that serde alone cannot (used on imported snapshots).
    pub fn validate(&self) -> DomainResult<()> {
        if self.timezone.parse::<Tz>().is_err() {
            return Err(invalid("timezone", format!("unknown timezone '{}'", self.timezone)));
        }
        if self.idle_timeout_seconds < MIN_IDLE_TIMEOUT_SECS {
            return Err(invalid(
                "idle_timeout_seconds",
                format!("must be at least {MIN_IDLE_TIMEOUT_SECS}"),
            ));
        }
        if self.flush_interval_seconds == 0 {
            return Err(invalid("flush_interval_seconds", "must be at least 1"));
        }
        Ok(())
    }

    /// The parsed reference timezone, falling back to UTC.
    #[must_use]
    pub fn reference_timezone(&self) -> Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }

    /// Period of the periodic flush timer.
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_seconds.max(1))
    }

    fn apply(&mut self, key: &str, value: &Value) -> DomainResult<()> {
        match key {
            "idle_timeout_seconds" => {
                let secs = as_u64(key, value)?;
                if secs < MIN_IDLE_TIMEOUT_SECS {
                    return Err(invalid(key, format!("must be at least {MIN_IDLE_TIMEOUT_SECS}")));
                }
                self.idle_timeout_seconds = secs;
            }
            "tracking_paused" => {
                self.tracking_paused = value
                    .as_bool()
                    .ok_or_else(|| invalid(key, "expected a boolean"))?;
            }
            "timezone" => {
                let tz = value
                    .as_str()
                    .ok_or_else(|| invalid(key, "expected a string"))?;
                if tz.parse::<Tz>().is_err() {
                    return Err(invalid(key, format!("unknown timezone '{tz}'")));
                }
                self.timezone = tz.to_string();
            }
            "retention_days" => {
                let days = as_u64(key, value)?;
                self.retention_days =
                    u32::try_from(days).map_err(|_| invalid(key, "value too large"))?;
            }
            "flush_interval_seconds" => {
                let secs = as_u64(key, value)?;
                if secs == 0 {
                    return Err(invalid(key, "must be at least 1"));
                }
                self.flush_interval_seconds = secs;
            }
            _ => {}
        }
        Ok(())
    }
}

fn as_u64(key: &str, value: &Value) -> DomainResult<u64> {
    value
        .as_u64()
        .ok_or_else(|| invalid(key, "expected a non-negative integer"))
}

fn invalid(key: &str, reason: impl Into<String>) -> DomainError {
    DomainError::InvalidSetting {
        key: key.to_string(),
        reason: reason.into(),
    }
}
