//! Protocol message types for daemon communication.
//!
//! Three kinds of clients share one socket:
//! - host bridges, which report focus, navigation and idle changes
//! - presentation clients (the CLI), which issue commands
//! - subscribers, which receive tracker events as they happen
//!
//! Every client message gets exactly one reply, except `Unsubscribe`
//! and `Disconnect`.

use crate::version::ProtocolVersion;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use webclock_core::{
    Constraint, ConstraintSet, IdleState, LimitReport, RangeTotals, Session, Settings, Snapshot,
    TargetId, TodayStats, UsageRange, UsageTable, WindowId,
};

/// Message types that can be sent by clients to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Client handshake/connection request
    Connect {
        /// Client identifier (optional)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    // ------------------------------------------------------------------
    // Host reports
    // ------------------------------------------------------------------
    /// A target became the active target of a focused window
    TargetFocused {
        target_id: TargetId,
        window_id: WindowId,
        /// Resource currently loaded, if the host knows it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource: Option<String>,
    },

    /// A target navigated to a new resource
    TargetUpdated {
        target_id: TargetId,
        resource: String,
    },

    /// A target was closed
    TargetRemoved { target_id: TargetId },

    /// Window focus moved; `None` means no host window has focus
    WindowFocusChanged {
        #[serde(default)]
        window_id: Option<WindowId>,
    },

    /// The host's idle detector changed state
    IdleStateChanged { state: IdleState },

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------
    GetTodayStats,

    SetPaused { paused: bool },

    GetSettings,

    /// Partial settings override; unknown keys are ignored
    SetSettings { settings: Map<String, Value> },

    ExportAll,

    ExportCsv,

    /// Replace the records carried by a JSON snapshot
    Import { data: Value },

    GetConstraints,

    SetConstraint { constraint: Constraint },

    RemoveConstraint { domain: String },

    GetLimitStatus,

    GetTotals {
        #[serde(default)]
        range: UsageRange,
    },

    /// The open session, if any
    CurrentSession,

    // ------------------------------------------------------------------
    // Connection control
    // ------------------------------------------------------------------
    /// Subscribe to tracker events and host directives
    Subscribe,

    /// Unsubscribe from updates
    Unsubscribe,

    /// Ping to check connection
    Ping {
        /// Sequence number for matching pong response
        seq: u64,
    },

    /// Client disconnecting gracefully
    Disconnect,
}

impl MessageType {
    /// Returns true for host reports (which feed the session state machine).
    pub fn is_host_report(&self) -> bool {
        matches!(
            self,
            Self::TargetFocused { .. }
                | Self::TargetUpdated { .. }
                | Self::TargetRemoved { .. }
                | Self::WindowFocusChanged { .. }
                | Self::IdleStateChanged { .. }
        )
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::TargetFocused { .. } => "target_focused",
            Self::TargetUpdated { .. } => "target_updated",
            Self::TargetRemoved { .. } => "target_removed",
            Self::WindowFocusChanged { .. } => "window_focus_changed",
            Self::IdleStateChanged { .. } => "idle_state_changed",
            Self::GetTodayStats => "get_today_stats",
            Self::SetPaused { .. } => "set_paused",
            Self::GetSettings => "get_settings",
            Self::SetSettings { .. } => "set_settings",
            Self::ExportAll => "export_all",
            Self::ExportCsv => "export_csv",
            Self::Import { .. } => "import",
            Self::GetConstraints => "get_constraints",
            Self::SetConstraint { .. } => "set_constraint",
            Self::RemoveConstraint { .. } => "remove_constraint",
            Self::GetLimitStatus => "get_limit_status",
            Self::GetTotals { .. } => "get_totals",
            Self::CurrentSession => "current_session",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Ping { .. } => "ping",
            Self::Disconnect => "disconnect",
        }
    }
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    /// Creates a connect message.
    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_id })
    }

    /// Creates a ping message.
    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    /// Creates a disconnect message.
    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Connection accepted
    Connected {
        /// Daemon's protocol version
        protocol_version: ProtocolVersion,
        /// Assigned client ID
        client_id: String,
    },

    /// Connection rejected (version mismatch, etc.)
    Rejected {
        reason: String,
        /// Daemon's protocol version (for client to upgrade)
        protocol_version: ProtocolVersion,
    },

    /// A host report was applied; carries the session now open
    Ack {
        #[serde(default)]
        session: Option<Session>,
    },

    TodayStats {
        day_key: String,
        usage: UsageTable,
        settings: Settings,
    },

    Settings { settings: Settings },

    Snapshot { snapshot: Snapshot },

    Csv { csv: String },

    /// An import was written
    Imported { records: usize },

    Constraints { constraints: ConstraintSet },

    LimitStatus { reports: Vec<LimitReport> },

    Totals { totals: RangeTotals },

    CurrentSession {
        #[serde(default)]
        session: Option<Session>,
    },

    // ------------------------------------------------------------------
    // Events pushed to subscribers
    // ------------------------------------------------------------------
    SessionOpened { session: Session },

    SessionClosed {
        domain: String,
        resource: String,
        seconds: u64,
    },

    SettingsChanged { settings: Settings },

    /// Host bridges should reconfigure their idle detector
    IdleThreshold { seconds: u64 },

    /// Pong response to ping
    Pong { seq: u64 },

    /// Error response
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl DaemonMessage {
    /// Creates a connected response.
    pub fn connected(client_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
        }
    }

    /// Creates a rejected response.
    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn today_stats(stats: TodayStats) -> Self {
        Self::TodayStats {
            day_key: stats.day_key,
            usage: stats.usage,
            settings: stats.settings,
        }
    }

    /// Creates a pong response.
    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    /// Creates an error response.
    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    /// Creates an error response with code.
    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
        }
    }
}
