//! Per-domain time budgets and their status classification.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Unit a constraint's limit is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitUnit {
    #[default]
    Minutes,
    Hours,
}

impl LimitUnit {
    /// Seconds in one unit.
    #[must_use]
    pub fn seconds(&self) -> u64 {
        match self {
            Self::Minutes => 60,
            Self::Hours => 3600,
        }
    }

    /// Parses `minutes`/`hours` (and the short forms `m`/`h`).
    pub fn parse(s: &str) -> DomainResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "minutes" | "minute" | "min" | "m" => Ok(Self::Minutes),
            "hours" | "hour" | "h" => Ok(Self::Hours),
            other => Err(DomainError::ParseError {
                field: "unit".to_string(),
                reason: format!("unknown unit '{other}'"),
            }),
        }
    }
}

impl fmt::Display for LimitUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minutes => write!(f, "minutes"),
            Self::Hours => write!(f, "hours"),
        }
    }
}

/// A daily time budget for one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub domain: String,
    #[serde(alias = "limit_value")]
    pub limit: u32,
    #[serde(default)]
    pub unit: LimitUnit,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Constraint {
    /// Creates an enabled constraint.
    pub fn new(domain: impl Into<String>, limit: u32, unit: LimitUnit) -> Self {
        Self {
            domain: domain.into(),
            limit,
            unit,
            enabled: true,
        }
    }

    /// The budget in seconds.
    #[must_use]
    pub fn limit_seconds(&self) -> u64 {
        u64::from(self.limit) * self.unit.seconds()
    }

    /// Rejects empty domains and zero limits.
    pub fn validate(&self) -> DomainResult<()> {
        if self.domain.trim().is_empty() {
            return Err(DomainError::InvalidConstraint {
                domain: self.domain.clone(),
                reason: "domain must not be empty".to_string(),
            });
        }
        if self.limit == 0 {
            return Err(DomainError::InvalidConstraint {
                domain: self.domain.clone(),
                reason: "limit must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Classifies `usage_seconds` against this budget.
    #[must_use]
    pub fn status(&self, usage_seconds: u64) -> LimitStatus {
        status(self, usage_seconds)
    }

    /// Builds a full report for today's usage.
    #[must_use]
    pub fn report(&self, usage_seconds: u64) -> LimitReport {
        let limit_seconds = self.limit_seconds();
        LimitReport {
            domain: self.domain.clone(),
            used_seconds: usage_seconds,
            limit_seconds,
            percent: percent_of(usage_seconds, limit_seconds),
            status: self.status(usage_seconds),
        }
    }
}

/// Constraints keyed by domain.
pub type ConstraintSet = BTreeMap<String, Constraint>;

/// Validates every constraint and that each is stored under its own domain.
pub fn validate_constraints(set: &ConstraintSet) -> DomainResult<()> {
    for (key, constraint) in set {
        constraint.validate()?;
        if key != &constraint.domain {
            return Err(DomainError::InvalidConstraint {
                domain: key.clone(),
                reason: format!("stored under '{key}' but names '{}'", constraint.domain),
            });
        }
    }
    Ok(())
}

/// Classification of a domain's usage against its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitStatus {
    Paused,
    Exceeded,
    Warning,
    Active,
}

impl fmt::Display for LimitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paused => write!(f, "paused"),
            Self::Exceeded => write!(f, "exceeded"),
            Self::Warning => write!(f, "warning"),
            Self::Active => write!(f, "active"),
        }
    }
}

/// Disabled wins over everything; then exceeded at 100%, warning at 80%.
#[must_use]
pub fn status(constraint: &Constraint, usage_seconds: u64) -> LimitStatus {
    if !constraint.enabled {
        return LimitStatus::Paused;
    }
    let limit = constraint.limit_seconds();
    if usage_seconds >= limit {
        LimitStatus::Exceeded
    } else if u128::from(usage_seconds) * 5 >= u128::from(limit) * 4 {
        LimitStatus::Warning
    } else {
        LimitStatus::Active
    }
}

/// One row of a limit status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitReport {
    pub domain: String,
    pub used_seconds: u64,
    pub limit_seconds: u64,
    /// Rounded share of the budget used, capped at 100
    pub percent: u8,
    pub status: LimitStatus,
}

fn percent_of(used: u64, limit: u64) -> u8 {
    if limit == 0 {
        return 100;
    }
    let pct = (u128::from(used) * 100 + u128::from(limit) / 2) / u128::from(limit);
    u8::try_from(pct.min(100)).unwrap_or(100)
}

/// Evaluates every constraint against a day's per-domain seconds.
#[must_use]
pub fn evaluate_all(constraints: &ConstraintSet, usage: &BTreeMap<String, u64>) -> Vec<LimitReport> {
    constraints
        .values()
        .map(|c| c.report(usage.get(&c.domain).copied().unwrap_or(0)))
        .collect()
}
