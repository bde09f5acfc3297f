//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Performs protocol version negotiation
//! - Parses incoming messages
//! - Applies host reports to the mirror and signals the tracker
//! - Routes commands to the tracker and sends the replies
//! - Registers subscribers for event broadcasts
//!
//! # Panic-Free Guarantees
//!
//! This module follows the crate's panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use webclock_protocol::{ClientMessage, DaemonMessage, MessageType, ProtocolVersion};

use crate::host::{HostDirective, HostMirror};
use crate::tracker::{Signal, TrackerError, TrackerEvent, TrackerHandle};

/// Type alias for subscriber writer handle
pub type SubscriberWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// Information about a subscribed client
pub struct Subscriber {
    /// Writer for sending events
    pub writer: SubscriberWriter,
}

/// Type alias for the subscribers map
pub type SubscribersMap = Arc<RwLock<HashMap<String, Subscriber>>>;

/// Maximum number of concurrent subscribers
pub(crate) const MAX_SUBSCRIBERS: usize = 10;

/// Maximum message size (4 MB, room for imports)
const MAX_MESSAGE_SIZE: usize = 4 * 1_048_576;

/// Read timeout for idle connections (30 minutes; host bridges stay connected)
const READ_TIMEOUT: Duration = Duration::from_secs(1800);

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Unique identifier for this connection
type ClientId = String;

/// Connection handler for a single client.
pub struct ConnectionHandler {
    /// Buffered reader for incoming messages
    reader: BufReader<OwnedReadHalf>,

    /// Buffered writer for outgoing messages (shared for event broadcast)
    writer: SubscriberWriter,

    /// Handle to the tracker actor
    tracker: TrackerHandle,

    /// Latest host state, updated from host reports
    mirror: Arc<HostMirror>,

    /// Shared subscribers map for event broadcasting
    subscribers: SubscribersMap,

    /// Unique client identifier (assigned after handshake)
    client_id: Option<ClientId>,

    /// Whether this client is subscribed to events
    subscribed: bool,

    /// Counter for generating client IDs
    connection_number: u64,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        tracker: TrackerHandle,
        mirror: Arc<HostMirror>,
        subscribers: SubscribersMap,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            tracker,
            mirror,
            subscribers,
            client_id: None,
            subscribed: false,
            connection_number,
        }
    }

    /// Runs the connection handler.
    ///
    /// Performs the handshake, then processes messages until the
    /// connection closes. Returns the client id for subscriber cleanup.
    pub async fn run(mut self) -> Option<ClientId> {
        debug!(connection = self.connection_number, "New client connected");

        if let Err(e) = self.handle_handshake().await {
            warn!(
                connection = self.connection_number,
                error = %e,
                "Handshake failed"
            );
            return None;
        }
        info!(client_id = ?self.client_id, "Client handshake completed");

        let client_id = self.client_id.clone();

        if let Err(e) = self.process_messages().await {
            debug!(
                client_id = ?self.client_id,
                error = %e,
                "Connection closed"
            );
        }

        info!(client_id = ?self.client_id, "Client disconnected");
        client_id
    }

    /// Expects a `Connect` message with a compatible protocol version.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = self.read_message().await?;

        let client_version = msg.protocol_version;
        if let Err(e) = client_version.ensure_supported() {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );
            self.send_message(DaemonMessage::rejected(&e.to_string()))
                .await?;
            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.message {
            MessageType::Connect { client_id } => {
                let assigned_id =
                    client_id.unwrap_or_else(|| format!("client-{}", self.connection_number));
                self.client_id = Some(assigned_id.clone());
                self.send_message(DaemonMessage::connected(assigned_id))
                    .await
            }
            other => {
                self.send_message(DaemonMessage::error(
                    "Expected Connect message for handshake",
                ))
                .await?;
                Err(ConnectionError::UnexpectedMessage(other.name().to_string()))
            }
        }
    }

    /// Reads and processes messages until EOF, disconnect or a fatal error.
    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        loop {
            let msg = match timeout(READ_TIMEOUT, self.read_message()).await {
                Ok(Ok(msg)) => msg,
                Ok(Err(ConnectionError::Eof)) => {
                    debug!(client_id = ?self.client_id, "Client sent EOF");
                    return Ok(());
                }
                Ok(Err(ConnectionError::ParseError(e))) => {
                    // A malformed line does not end the connection.
                    warn!(client_id = ?self.client_id, error = %e, "Malformed message");
                    self.send_message(DaemonMessage::error_with_code(
                        &format!("Malformed message: {e}"),
                        "parse",
                    ))
                    .await?;
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!(client_id = ?self.client_id, "Connection timed out");
                    return Err(ConnectionError::Timeout);
                }
            };

            self.handle_message(msg).await?;
        }
    }

    /// Handles a single client message.
    async fn handle_message(&mut self, msg: ClientMessage) -> Result<(), ConnectionError> {
        debug!(
            client_id = ?self.client_id,
            message = msg.message.name(),
            "Received message"
        );

        let reply = match msg.message {
            MessageType::Connect { .. } => DaemonMessage::error("Already connected"),

            // Host reports: update the mirror first so the tracker sees it.
            MessageType::TargetFocused {
                target_id,
                window_id,
                resource,
            } => {
                self.mirror
                    .target_focused(target_id.clone(), window_id, resource)
                    .await;
                self.signal(Signal::TargetFocused { target_id }).await
            }
            MessageType::TargetUpdated {
                target_id,
                resource,
            } => {
                self.mirror
                    .target_updated(target_id.clone(), resource)
                    .await;
                self.signal(Signal::Navigated { target_id }).await
            }
            MessageType::TargetRemoved { target_id } => {
                self.mirror.target_removed(&target_id).await;
                self.signal(Signal::TargetRemoved { target_id }).await
            }
            MessageType::WindowFocusChanged { window_id } => {
                self.mirror.window_focus_changed(window_id.clone()).await;
                let signal = match window_id {
                    Some(window_id) => Signal::WindowFocused { window_id },
                    None => Signal::FocusLost,
                };
                self.signal(signal).await
            }
            MessageType::IdleStateChanged { state } => {
                self.signal(Signal::IdleStateChanged(state)).await
            }

            // Commands
            MessageType::GetTodayStats => {
                reply(self.tracker.today_stats().await, DaemonMessage::today_stats)
            }
            MessageType::SetPaused { paused } => {
                reply(self.tracker.set_paused(paused).await, |settings| {
                    DaemonMessage::Settings { settings }
                })
            }
            MessageType::GetSettings => reply(self.tracker.settings().await, |settings| {
                DaemonMessage::Settings { settings }
            }),
            MessageType::SetSettings { settings } => {
                reply(self.tracker.set_settings(settings).await, |settings| {
                    DaemonMessage::Settings { settings }
                })
            }
            MessageType::ExportAll => reply(self.tracker.export_all().await, |snapshot| {
                DaemonMessage::Snapshot { snapshot }
            }),
            MessageType::ExportCsv => {
                reply(self.tracker.export_csv().await, |csv| DaemonMessage::Csv { csv })
            }
            MessageType::Import { data } => reply(self.tracker.import(data).await, |records| {
                DaemonMessage::Imported { records }
            }),
            MessageType::GetConstraints => {
                reply(self.tracker.constraints().await, |constraints| {
                    DaemonMessage::Constraints { constraints }
                })
            }
            MessageType::SetConstraint { constraint } => {
                reply(self.tracker.set_constraint(constraint).await, |constraints| {
                    DaemonMessage::Constraints { constraints }
                })
            }
            MessageType::RemoveConstraint { domain } => {
                reply(self.tracker.remove_constraint(domain).await, |constraints| {
                    DaemonMessage::Constraints { constraints }
                })
            }
            MessageType::GetLimitStatus => {
                reply(self.tracker.limit_status().await, |reports| {
                    DaemonMessage::LimitStatus { reports }
                })
            }
            MessageType::GetTotals { range } => {
                reply(self.tracker.totals(range).await, |totals| {
                    DaemonMessage::Totals { totals }
                })
            }
            MessageType::CurrentSession => {
                reply(self.tracker.current_session().await, |session| {
                    DaemonMessage::CurrentSession { session }
                })
            }

            // Connection control
            MessageType::Subscribe => self.subscribe().await,
            MessageType::Unsubscribe => {
                self.unsubscribe().await;
                return Ok(());
            }
            MessageType::Ping { seq } => DaemonMessage::pong(seq),
            MessageType::Disconnect => {
                debug!(client_id = ?self.client_id, "Client requested disconnect");
                return Err(ConnectionError::Eof);
            }
        };

        self.send_message(reply).await
    }

    /// Forwards a host signal to the tracker and acknowledges it.
    async fn signal(&self, signal: Signal) -> DaemonMessage {
        reply(self.tracker.signal(signal).await, |session| {
            DaemonMessage::Ack { session }
        })
    }

    async fn subscribe(&mut self) -> DaemonMessage {
        let Some(client_id) = self.client_id.clone() else {
            return DaemonMessage::error("Must connect before subscribing");
        };

        {
            let mut subs = self.subscribers.write().await;
            if subs.len() >= MAX_SUBSCRIBERS && !subs.contains_key(&client_id) {
                return DaemonMessage::error(&format!(
                    "Too many subscribers (max: {MAX_SUBSCRIBERS})"
                ));
            }
            subs.insert(
                client_id.clone(),
                Subscriber {
                    writer: Arc::clone(&self.writer),
                },
            );
        }

        self.subscribed = true;
        debug!(client_id = %client_id, "Client subscribed to updates");

        // Initial state: the idle threshold host bridges should apply.
        DaemonMessage::IdleThreshold {
            seconds: self.mirror.idle_threshold().await,
        }
    }

    async fn unsubscribe(&mut self) {
        if let Some(ref client_id) = self.client_id {
            self.subscribers.write().await.remove(client_id);
        }
        self.subscribed = false;
        debug!(client_id = ?self.client_id, "Client unsubscribed from updates");
    }

    /// Reads a single message from the client.
    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        let mut line = String::new();

        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        serde_json::from_str(&line).map_err(|e| ConnectionError::ParseError(e.to_string()))
    }

    /// Sends a message to the client.
    async fn send_message(&self, msg: DaemonMessage) -> Result<(), ConnectionError> {
        write_message(&self.writer, &msg).await
    }

    /// Checks if this client is subscribed to events.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }
}

/// Turns a tracker result into a reply, mapping errors to coded errors.
fn reply<T>(
    result: Result<T, TrackerError>,
    ok: impl FnOnce(T) -> DaemonMessage,
) -> DaemonMessage {
    match result {
        Ok(value) => ok(value),
        Err(e) => {
            let code = match &e {
                TrackerError::Domain(_) => "invalid",
                TrackerError::Store(_) => "storage",
                TrackerError::ChannelClosed => "unavailable",
            };
            warn!(error = %e, code, "Command failed");
            DaemonMessage::error_with_code(&e.to_string(), code)
        }
    }
}

/// Converts a tracker event into the message pushed to subscribers.
pub fn event_message(event: &TrackerEvent) -> DaemonMessage {
    match event {
        TrackerEvent::SessionOpened { session } => DaemonMessage::SessionOpened {
            session: session.clone(),
        },
        TrackerEvent::SessionClosed {
            domain,
            resource,
            seconds,
        } => DaemonMessage::SessionClosed {
            domain: domain.clone(),
            resource: resource.clone(),
            seconds: *seconds,
        },
        TrackerEvent::SettingsChanged { settings } => DaemonMessage::SettingsChanged {
            settings: settings.clone(),
        },
    }
}

/// Converts a host directive into the message pushed to subscribers.
pub fn directive_message(directive: HostDirective) -> DaemonMessage {
    match directive {
        HostDirective::SetIdleThreshold { seconds } => DaemonMessage::IdleThreshold { seconds },
    }
}

/// Writes one newline-terminated message with a timeout.
pub async fn write_message(
    writer: &SubscriberWriter,
    msg: &DaemonMessage,
) -> Result<(), ConnectionError> {
    let json =
        serde_json::to_string(msg).map_err(|e| ConnectionError::ParseError(e.to_string()))?;

    let mut writer = writer.lock().await;

    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use webclock_core::{DomainError, Settings};

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::VersionMismatch {
            client: ProtocolVersion::new(2, 0),
            server: ProtocolVersion::new(1, 0),
        };
        assert!(err.to_string().contains("2.0"));
        assert!(err.to_string().contains("1.0"));
    }

    #[test]
    fn test_reply_maps_error_codes() {
        let msg = reply::<()>(
            Err(TrackerError::Store(StoreError::Io("disk".to_string()))),
            |_| DaemonMessage::pong(0),
        );
        assert!(matches!(msg, DaemonMessage::Error { code: Some(ref c), .. } if c == "storage"));

        let msg = reply::<()>(
            Err(TrackerError::Domain(DomainError::snapshot("bad"))),
            |_| DaemonMessage::pong(0),
        );
        assert!(matches!(msg, DaemonMessage::Error { code: Some(ref c), .. } if c == "invalid"));
    }

    #[test]
    fn test_event_message_mapping() {
        let msg = event_message(&TrackerEvent::SessionClosed {
            domain: "a.example".to_string(),
            resource: "https://a.example/".to_string(),
            seconds: 9,
        });
        assert!(matches!(msg, DaemonMessage::SessionClosed { seconds: 9, .. }));

        let msg = event_message(&TrackerEvent::SettingsChanged {
            settings: Settings::default(),
        });
        assert!(matches!(msg, DaemonMessage::SettingsChanged { .. }));

        let msg = directive_message(HostDirective::SetIdleThreshold { seconds: 75 });
        assert!(matches!(msg, DaemonMessage::IdleThreshold { seconds: 75 }));
    }
}
