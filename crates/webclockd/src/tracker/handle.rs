//! Client interface for interacting with the TrackerActor.
//!
//! The `TrackerHandle` provides a cheap-to-clone interface for sending
//! commands to the tracker actor and subscribing to its events. Channel
//! errors are mapped to `TrackerError::ChannelClosed`.

use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc, oneshot};

use webclock_core::{
    Constraint, ConstraintSet, LimitReport, RangeTotals, Session, Settings, Snapshot, TodayStats,
    UsageRange,
};

use super::commands::{Signal, TrackerCommand, TrackerError, TrackerEvent};

// ============================================================================
// Tracker Handle
// ============================================================================

/// Handle for interacting with the tracker actor.
///
/// # Usage
///
/// ```ignore
/// let handle = tracker_handle.clone();
///
/// // Feed a host signal
/// let session = handle.signal(Signal::FocusLost).await?;
///
/// // Query stats
/// let stats = handle.today_stats().await?;
///
/// // Subscribe to events
/// let mut rx = handle.subscribe();
/// while let Ok(event) = rx.recv().await {
///     // Handle event
/// }
/// ```
#[derive(Clone)]
pub struct TrackerHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<TrackerCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<TrackerEvent>,
}

impl TrackerHandle {
    /// Create a new tracker handle.
    pub fn new(
        sender: mpsc::Sender<TrackerCommand>,
        event_sender: broadcast::Sender<TrackerEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Sends a command built around a fresh oneshot and awaits the reply.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> TrackerCommand,
    ) -> Result<T, TrackerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| TrackerError::ChannelClosed)?;
        rx.await.map_err(|_| TrackerError::ChannelClosed)
    }

    /// Applies a host signal; returns the session open afterwards.
    ///
    /// # Errors
    ///
    /// - `TrackerError::ChannelClosed` if the actor has shut down
    pub async fn signal(&self, signal: Signal) -> Result<Option<Session>, TrackerError> {
        self.request(|respond_to| TrackerCommand::Signal { signal, respond_to })
            .await
    }

    /// Today's day-key, the usage table and the settings.
    pub async fn today_stats(&self) -> Result<TodayStats, TrackerError> {
        self.request(|respond_to| TrackerCommand::GetTodayStats { respond_to })
            .await?
    }

    /// Pauses or resumes tracking; returns the updated settings.
    pub async fn set_paused(&self, paused: bool) -> Result<Settings, TrackerError> {
        self.request(|respond_to| TrackerCommand::SetPaused { paused, respond_to })
            .await?
    }

    pub async fn settings(&self) -> Result<Settings, TrackerError> {
        self.request(|respond_to| TrackerCommand::GetSettings { respond_to })
            .await
    }

    /// Merges a partial override into the settings.
    ///
    /// # Errors
    ///
    /// - `TrackerError::Domain` if a known key has the wrong type or value
    /// - `TrackerError::Store` if the settings could not be saved
    /// - `TrackerError::ChannelClosed` if the actor has shut down
    pub async fn set_settings(
        &self,
        overrides: Map<String, Value>,
    ) -> Result<Settings, TrackerError> {
        self.request(|respond_to| TrackerCommand::SetSettings {
            overrides,
            respond_to,
        })
        .await?
    }

    pub async fn export_all(&self) -> Result<Snapshot, TrackerError> {
        self.request(|respond_to| TrackerCommand::ExportAll { respond_to })
            .await?
    }

    pub async fn export_csv(&self) -> Result<String, TrackerError> {
        self.request(|respond_to| TrackerCommand::ExportCsv { respond_to })
            .await?
    }

    /// Imports a JSON snapshot; returns the number of records written.
    ///
    /// Nothing is written unless the whole snapshot validates.
    pub async fn import(&self, data: Value) -> Result<usize, TrackerError> {
        self.request(|respond_to| TrackerCommand::Import { data, respond_to })
            .await?
    }

    pub async fn constraints(&self) -> Result<ConstraintSet, TrackerError> {
        self.request(|respond_to| TrackerCommand::GetConstraints { respond_to })
            .await?
    }

    pub async fn set_constraint(
        &self,
        constraint: Constraint,
    ) -> Result<ConstraintSet, TrackerError> {
        self.request(|respond_to| TrackerCommand::SetConstraint {
            constraint,
            respond_to,
        })
        .await?
    }

    pub async fn remove_constraint(&self, domain: String) -> Result<ConstraintSet, TrackerError> {
        self.request(|respond_to| TrackerCommand::RemoveConstraint { domain, respond_to })
            .await?
    }

    pub async fn limit_status(&self) -> Result<Vec<LimitReport>, TrackerError> {
        self.request(|respond_to| TrackerCommand::GetLimitStatus { respond_to })
            .await?
    }

    pub async fn totals(&self, range: UsageRange) -> Result<RangeTotals, TrackerError> {
        self.request(|respond_to| TrackerCommand::GetTotals { range, respond_to })
            .await?
    }

    pub async fn current_session(&self) -> Result<Option<Session>, TrackerError> {
        self.request(|respond_to| TrackerCommand::CurrentSession { respond_to })
            .await
    }

    /// Flushes the usage buffer and waits for the result.
    pub async fn flush(&self) -> Result<(), TrackerError> {
        self.request(|tx| TrackerCommand::Flush {
            respond_to: Some(tx),
        })
        .await?
    }

    /// Closes the open session, flushes, and stops the actor.
    ///
    /// Returns once the final flush has been attempted.
    pub async fn shutdown(&self) -> Result<(), TrackerError> {
        self.request(|respond_to| TrackerCommand::Shutdown { respond_to })
            .await
    }

    /// Subscribe to tracker events.
    ///
    /// Returns a broadcast receiver that will receive all future events.
    /// Events sent before subscribing are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.event_sender.subscribe()
    }

    /// Returns true if the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_channel_maps_to_error() {
        let (tx, rx) = mpsc::channel(1);
        let (event_tx, _) = broadcast::channel(1);
        drop(rx);
        let handle = TrackerHandle::new(tx, event_tx);

        assert!(handle.is_closed());
        assert!(matches!(
            handle.settings().await,
            Err(TrackerError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_dropped_responder_maps_to_error() {
        let (tx, mut rx) = mpsc::channel(1);
        let (event_tx, _) = broadcast::channel(1);
        let handle = TrackerHandle::new(tx, event_tx);

        tokio::spawn(async move {
            // Receive the command and drop its responder.
            let _ = rx.recv().await;
        });

        assert!(matches!(
            handle.current_session().await,
            Err(TrackerError::ChannelClosed)
        ));
    }
}
