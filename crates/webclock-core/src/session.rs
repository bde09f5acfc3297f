//! Focus session entities and value objects.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::classify;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Opaque identifier of a focusable target (a browser tab).
///
/// The host decides the format; the tracker only compares identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    /// Creates a new TargetId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TargetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TargetId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque identifier of a host window that groups targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(String);

impl WindowId {
    /// Creates a new WindowId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WindowId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Host Idle State
// ============================================================================

/// User presence as reported by the host's idle detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleState {
    /// The user is interacting with the machine.
    Active,
    /// No input for longer than the idle threshold.
    Idle,
    /// The screen is locked.
    Locked,
}

impl IdleState {
    /// Returns true for states during which no time is attributed.
    #[must_use]
    pub fn is_away(&self) -> bool {
        matches!(self, Self::Idle | Self::Locked)
    }
}

impl fmt::Display for IdleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Idle => write!(f, "idle"),
            Self::Locked => write!(f, "locked"),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// The open interval during which one target is considered actively viewed.
///
/// The domain is computed once when the session opens and never changes;
/// navigating inside the target closes this session and opens another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Target holding focus
    pub target_id: TargetId,
    /// Attribution key derived from `resource`
    pub domain: String,
    /// Full resource identifier at open time
    pub resource: String,
    /// When the session opened
    pub start_time: DateTime<Utc>,
}

impl Session {
    /// Opens a session for `resource` on `target_id` at `now`.
    pub fn open(target_id: TargetId, resource: impl Into<String>, now: DateTime<Utc>) -> Self {
        let resource = resource.into();
        Self {
            target_id,
            domain: classify(&resource),
            resource,
            start_time: now,
        }
    }

    /// Whole seconds elapsed since the session opened, floored.
    ///
    /// A clock that moved backwards yields zero rather than a negative span.
    #[must_use]
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> u64 {
        let secs = now.signed_duration_since(self.start_time).num_seconds();
        u64::try_from(secs).unwrap_or(0)
    }
}

/// Best-effort crash-recovery hint describing the most recently opened session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastActive {
    pub target_id: TargetId,
    pub domain: String,
    pub resource: String,
    pub start_time: DateTime<Utc>,
}

impl From<&Session> for LastActive {
    fn from(session: &Session) -> Self {
        Self {
            target_id: session.target_id.clone(),
            domain: session.domain.clone(),
            resource: session.resource.clone(),
            start_time: session.start_time,
        }
    }
}
