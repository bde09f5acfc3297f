//! webclock core - Domain types for per-domain web time tracking
//!
//! This crate holds the pure parts of the tracker shared between the
//! daemon (webclockd) and the CLI (webclock): resource classification,
//! usage tables and their merge, settings, limits and export formats.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod classify;
pub mod clock;
pub mod error;
pub mod export;
pub mod limit;
pub mod session;
pub mod settings;
pub mod usage;

// Re-exports for convenience
pub use classify::{classify, is_trackable, UNKNOWN_DOMAIN};
pub use clock::{date_key, day_key, local_date, Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use export::{to_csv, Snapshot, CSV_HEADER};
pub use limit::{
    evaluate_all, status, validate_constraints, Constraint, ConstraintSet, LimitReport,
    LimitStatus, LimitUnit,
};
pub use session::{IdleState, LastActive, Session, TargetId, WindowId};
pub use settings::Settings;
pub use usage::{
    format_hms, DayUsage, DomainRecord, DomainTotals, RangeTotals, TodayStats, UsageRange,
    UsageTable,
};
