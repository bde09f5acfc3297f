//! JSON snapshots and CSV rendering of stored data.
//!
//! A [`Snapshot`] is what `export` produces and what `import` accepts.
//! Every record is optional; an import replaces exactly the records it
//! carries.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DomainError, DomainResult};
use crate::limit::{validate_constraints, ConstraintSet};
use crate::session::LastActive;
use crate::settings::Settings;
use crate::usage::UsageTable;

/// Header row of the CSV export.
pub const CSV_HEADER: &str = "date,domain,seconds,visits";

/// Top-level keys a snapshot may carry.
const KNOWN_RECORDS: &[&str] = &["usage", "settings", "last_active", "constraints"];

/// Full dump of the durable records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageTable>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active: Option<LastActive>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<ConstraintSet>,
}

impl Snapshot {
    /// Parses and fully validates an untrusted snapshot.
    ///
    /// Nothing is accepted unless everything is: the value must be an
    /// object naming at least one known record, every record must
    /// deserialize, and usage must satisfy the pages-sum invariant.
    pub fn parse(value: &Value) -> DomainResult<Self> {
        let Value::Object(map) = value else {
            return Err(DomainError::snapshot("expected a JSON object"));
        };

        if !map.keys().any(|k| KNOWN_RECORDS.contains(&k.as_str())) {
            return Err(DomainError::snapshot(format!(
                "no known records (expected one of: {})",
                KNOWN_RECORDS.join(", ")
            )));
        }

        let snapshot: Snapshot =
            serde_json::from_value(value.clone()).map_err(DomainError::snapshot)?;

        if let Some(usage) = &snapshot.usage {
            usage.validate()?;
        }
        if let Some(settings) = &snapshot.settings {
            settings
                .validate()
                .map_err(|e| DomainError::snapshot(format!("settings: {e}")))?;
        }
        if let Some(constraints) = &snapshot.constraints {
            validate_constraints(constraints)
                .map_err(|e| DomainError::snapshot(format!("constraints: {e}")))?;
        }

        Ok(snapshot)
    }

    /// Number of records this snapshot would write.
    #[must_use]
    pub fn record_count(&self) -> usize {
        usize::from(self.usage.is_some())
            + usize::from(self.settings.is_some())
            + usize::from(self.last_active.is_some())
            + usize::from(self.constraints.is_some())
    }
}

/// Renders one row per day × domain, ordered by date then domain.
#[must_use]
pub fn to_csv(usage: &UsageTable) -> String {
    let mut lines = vec![CSV_HEADER.to_string()];
    for (day_key, domains) in usage.days() {
        for (domain, record) in domains {
            lines.push(format!(
                "{day_key},{domain},{},{}",
                record.seconds, record.visits
            ));
        }
    }
    lines.join("\n")
}
