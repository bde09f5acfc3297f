//! webclock protocol - Wire protocol for daemon communication
//!
//! Newline-delimited JSON messages exchanged over the daemon's Unix
//! socket, both by host bridges reporting focus changes and by
//! presentation clients issuing commands.

pub mod message;
pub mod version;

pub use message::{ClientMessage, DaemonMessage, MessageType};
pub use version::{ProtocolVersion, VersionError};
