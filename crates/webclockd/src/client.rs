//! Request/response client for the daemon socket.
//!
//! Used by the `webclock` CLI and by host bridges. A client connects,
//! completes the `Connect`/`Connected` handshake, then sends one message
//! at a time and reads the reply. After `Subscribe`, pushed events can be
//! read with [`DaemonClient::next_message`].
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` in this module.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{debug, info};

use webclock_protocol::{ClientMessage, DaemonMessage, MessageType, ProtocolVersion};

/// How long to wait for any single reply.
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors seen by a daemon client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to daemon at {path}: {error}")]
    Connect { path: String, error: String },

    #[error("Protocol version mismatch (client: {client_version}, daemon: {daemon_version})")]
    VersionMismatch {
        client_version: String,
        daemon_version: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The daemon answered with an error message
    #[error("Daemon error: {message}")]
    Daemon {
        message: String,
        code: Option<String>,
    },

    #[error("Daemon closed the connection")]
    Closed,

    #[error("Timed out waiting for daemon reply")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse message: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A connected, handshaken daemon client.
pub struct DaemonClient {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    client_id: String,
}

impl DaemonClient {
    /// Connects to the socket at `path` and performs the handshake.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        Self::connect_as(path, None).await
    }

    /// Like [`connect`](Self::connect), requesting a specific client id.
    pub async fn connect_as(
        path: impl AsRef<Path>,
        client_id: Option<String>,
    ) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| ClientError::Connect {
                path: path.display().to_string(),
                error: e.to_string(),
            })?;

        let (reader, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            client_id: String::new(),
        };

        client.send(&ClientMessage::connect(client_id)).await?;
        match client.next_message().await? {
            DaemonMessage::Connected {
                protocol_version,
                client_id,
            } => {
                if !ProtocolVersion::CURRENT.is_compatible_with(&protocol_version) {
                    return Err(ClientError::VersionMismatch {
                        client_version: ProtocolVersion::CURRENT.to_string(),
                        daemon_version: protocol_version.to_string(),
                    });
                }
                info!(client_id, protocol_version = %protocol_version, "Handshake complete");
                client.client_id = client_id;
                Ok(client)
            }
            DaemonMessage::Rejected {
                protocol_version, ..
            } => Err(ClientError::VersionMismatch {
                client_version: ProtocolVersion::CURRENT.to_string(),
                daemon_version: protocol_version.to_string(),
            }),
            other => Err(ClientError::Protocol(format!(
                "Unexpected response to connect: {other:?}"
            ))),
        }
    }

    /// The id the daemon assigned to this connection.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Sends one message and returns the daemon's reply.
    ///
    /// An `Error` reply is returned as [`ClientError::Daemon`].
    pub async fn request(&mut self, message: MessageType) -> Result<DaemonMessage, ClientError> {
        self.send(&ClientMessage::new(message)).await?;
        match self.next_message().await? {
            DaemonMessage::Error { message, code } => Err(ClientError::Daemon { message, code }),
            reply => Ok(reply),
        }
    }

    /// Reads the next message from the daemon, waiting up to the reply timeout.
    pub async fn next_message(&mut self) -> Result<DaemonMessage, ClientError> {
        let mut line = String::new();
        let read = timeout(REPLY_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .map_err(|_| ClientError::Timeout)??;
        if read == 0 {
            return Err(ClientError::Closed);
        }
        Ok(serde_json::from_str(line.trim())?)
    }

    /// Says goodbye and closes the connection.
    pub async fn disconnect(mut self) -> Result<(), ClientError> {
        self.send(&ClientMessage::disconnect()).await?;
        self.writer.shutdown().await?;
        Ok(())
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        let json = serde_json::to_string(message)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        debug!(message_type = message.message.name(), "Sent message to daemon");
        Ok(())
    }
}
