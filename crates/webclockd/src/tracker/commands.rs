//! Tracker actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `TrackerActor`:
//! - `Signal`: Host-originated changes that drive the session state machine
//! - `TrackerCommand`: Commands sent to the actor
//! - `TrackerError`: Errors that can occur while handling a command
//! - `TrackerEvent`: Events published by the tracker for subscribers

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::oneshot;

use webclock_core::{
    Constraint, ConstraintSet, DomainError, IdleState, LimitReport, RangeTotals, Session,
    Settings, Snapshot, TargetId, TodayStats, UsageRange, WindowId,
};

use crate::store::StoreError;

// ============================================================================
// Host Signals
// ============================================================================

/// A change in host state, already reduced to what the tracker needs.
///
/// Signals carry identifiers only. Target metadata is looked up from the
/// host when the signal is processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// A target gained focus.
    TargetFocused { target_id: TargetId },

    /// A host window gained focus; its active target takes over.
    WindowFocused { window_id: WindowId },

    /// No host window has focus.
    FocusLost,

    /// A target loaded a new resource.
    Navigated { target_id: TargetId },

    /// A target was closed.
    TargetRemoved { target_id: TargetId },

    /// The host idle detector changed state.
    IdleStateChanged(IdleState),
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TargetFocused { .. } => "target_focused",
            Self::WindowFocused { .. } => "window_focused",
            Self::FocusLost => "focus_lost",
            Self::Navigated { .. } => "navigated",
            Self::TargetRemoved { .. } => "target_removed",
            Self::IdleStateChanged(_) => "idle_state_changed",
        }
    }
}

// ============================================================================
// Tracker Commands
// ============================================================================

/// Commands sent to the tracker actor.
///
/// Each command uses a oneshot channel for the response, so every caller
/// waits until its command has been fully processed.
#[derive(Debug)]
pub enum TrackerCommand {
    /// Apply a host signal. Replies with the session open afterwards.
    Signal {
        signal: Signal,
        respond_to: oneshot::Sender<Option<Session>>,
    },

    /// Day-key, full usage table and settings.
    GetTodayStats {
        respond_to: oneshot::Sender<Result<TodayStats, TrackerError>>,
    },

    /// Pause or resume tracking.
    ///
    /// Pausing closes the open session; resuming reopens on the focused
    /// target when eligible.
    ///
    /// # Errors
    /// - `TrackerError::Store` if the new state could not be persisted; the
    ///   change still applies for the running tracker
    SetPaused {
        paused: bool,
        respond_to: oneshot::Sender<Result<Settings, TrackerError>>,
    },

    GetSettings {
        respond_to: oneshot::Sender<Settings>,
    },

    /// Merge a partial override into the settings.
    ///
    /// # Errors
    /// - `TrackerError::Domain` if a known key has a bad value
    /// - `TrackerError::Store` if the settings could not be persisted
    SetSettings {
        overrides: Map<String, Value>,
        respond_to: oneshot::Sender<Result<Settings, TrackerError>>,
    },

    /// Every durable record as a JSON snapshot.
    ExportAll {
        respond_to: oneshot::Sender<Result<Snapshot, TrackerError>>,
    },

    /// Usage table rendered as CSV.
    ExportCsv {
        respond_to: oneshot::Sender<Result<String, TrackerError>>,
    },

    /// Validate and write a snapshot. Replies with the number of records written.
    Import {
        data: Value,
        respond_to: oneshot::Sender<Result<usize, TrackerError>>,
    },

    GetConstraints {
        respond_to: oneshot::Sender<Result<ConstraintSet, TrackerError>>,
    },

    /// Insert or replace the constraint for its domain.
    SetConstraint {
        constraint: Constraint,
        respond_to: oneshot::Sender<Result<ConstraintSet, TrackerError>>,
    },

    RemoveConstraint {
        domain: String,
        respond_to: oneshot::Sender<Result<ConstraintSet, TrackerError>>,
    },

    /// Every constraint evaluated against today's usage.
    GetLimitStatus {
        respond_to: oneshot::Sender<Result<Vec<LimitReport>, TrackerError>>,
    },

    GetTotals {
        range: UsageRange,
        respond_to: oneshot::Sender<Result<RangeTotals, TrackerError>>,
    },

    CurrentSession {
        respond_to: oneshot::Sender<Option<Session>>,
    },

    /// Flush the buffer now.
    ///
    /// Fire-and-forget when sent by the periodic flush task.
    Flush {
        respond_to: Option<oneshot::Sender<Result<(), TrackerError>>>,
    },

    /// Close the open session, flush, and stop.
    Shutdown { respond_to: oneshot::Sender<()> },
}

// ============================================================================
// Tracker Errors
// ============================================================================

/// Errors that can occur during tracker operations.
#[derive(Debug, Clone, Error)]
pub enum TrackerError {
    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

// ============================================================================
// Tracker Events
// ============================================================================

/// Events published by the tracker to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    /// A session opened.
    SessionOpened { session: Session },

    /// A session closed after accruing `seconds` (possibly zero).
    SessionClosed {
        domain: String,
        resource: String,
        seconds: u64,
    },

    /// Settings changed through a command or an import.
    SettingsChanged { settings: Settings },
}
