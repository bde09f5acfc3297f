//! Tracker actor - owns the open session and the usage buffer.
//!
//! The TrackerActor is the single owner of attribution state. Host signals,
//! presentation commands and flush ticks all arrive on one mpsc channel and
//! are handled one at a time, so a close/open pair is never interleaved
//! with anything else.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the crate's panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Storage failures are logged and reported to the caller, never fatal
//! - Channel send failures are ignored (the caller went away)

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use webclock_core::{
    day_key, evaluate_all, is_trackable, local_date, to_csv, Clock, Constraint, ConstraintSet,
    DomainError, LastActive, LimitReport, RangeTotals, Session, Settings, Snapshot,
    TargetId, TodayStats, UsageRange, UsageTable,
};

use super::aggregator::{Aggregator, FlushOutcome};
use super::commands::{Signal, TrackerCommand, TrackerError, TrackerEvent};
use crate::host::{Host, TargetInfo};
use crate::store::{self, RecordKey, StateStore};

// ============================================================================
// Tracker Actor
// ============================================================================

/// The tracker actor - owns the session state machine.
///
/// # State
///
/// - `current`: the open session, if any (at most one exists)
/// - `idle`: set while the host reports idle or locked; suppresses opening
/// - `aggregator`: closed-session deltas not yet flushed
/// - `settings`: loaded once at startup, then changed only by commands
pub struct TrackerActor {
    /// Command receiver
    receiver: mpsc::Receiver<TrackerCommand>,

    host: Arc<dyn Host>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,

    settings: Settings,
    current: Option<Session>,
    idle: bool,
    aggregator: Aggregator,

    /// Event publisher for subscribers
    event_publisher: broadcast::Sender<TrackerEvent>,

    /// Period of the periodic flush task
    flush_interval: watch::Sender<Duration>,
}

impl TrackerActor {
    /// Creates a new tracker actor with default settings.
    ///
    /// Stored settings are loaded by [`TrackerActor::run`].
    pub fn new(
        receiver: mpsc::Receiver<TrackerCommand>,
        host: Arc<dyn Host>,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        event_publisher: broadcast::Sender<TrackerEvent>,
        flush_interval: watch::Sender<Duration>,
    ) -> Self {
        Self {
            receiver,
            host,
            store,
            clock,
            settings: Settings::default(),
            current: None,
            idle: false,
            aggregator: Aggregator::new(),
            event_publisher,
            flush_interval,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Loads settings, then processes commands until `Shutdown` arrives or
    /// every handle has been dropped. Either way the open session is
    /// closed and flushed before returning.
    pub async fn run(mut self) {
        info!("Tracker actor starting");
        self.initialize().await;

        while let Some(cmd) = self.receiver.recv().await {
            if self.handle_command(cmd).await.is_break() {
                info!("Tracker actor stopped");
                return;
            }
        }

        // All handles dropped without an explicit shutdown.
        self.close_session().await;
        let _ = self.flush().await;
        info!(
            pending = !self.aggregator.is_empty(),
            "Tracker actor stopped (channel closed)"
        );
    }

    /// Loads settings and pushes the idle threshold to the host.
    pub(crate) async fn initialize(&mut self) {
        self.settings = match store::load_settings(self.store.as_ref()).await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Could not load settings, using defaults");
                Settings::default()
            }
        };

        self.host
            .set_idle_threshold(self.settings.idle_timeout_seconds)
            .await;
        self.flush_interval.send_replace(self.settings.flush_interval());

        info!(
            paused = self.settings.tracking_paused,
            idle_timeout = self.settings.idle_timeout_seconds,
            timezone = %self.settings.timezone,
            "Settings loaded"
        );
    }

    /// Dispatches a command to the appropriate handler.
    pub(crate) async fn handle_command(&mut self, cmd: TrackerCommand) -> ControlFlow<()> {
        match cmd {
            TrackerCommand::Signal { signal, respond_to } => {
                self.handle_signal(signal).await;
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(self.current.clone());
            }
            TrackerCommand::GetTodayStats { respond_to } => {
                let result = self.handle_get_today_stats().await;
                let _ = respond_to.send(result);
            }
            TrackerCommand::SetPaused { paused, respond_to } => {
                let result = self.handle_set_paused(paused).await;
                let _ = respond_to.send(result);
            }
            TrackerCommand::GetSettings { respond_to } => {
                let _ = respond_to.send(self.settings.clone());
            }
            TrackerCommand::SetSettings {
                overrides,
                respond_to,
            } => {
                let result = self.handle_set_settings(&overrides).await;
                let _ = respond_to.send(result);
            }
            TrackerCommand::ExportAll { respond_to } => {
                let result = self.handle_export_all().await;
                let _ = respond_to.send(result);
            }
            TrackerCommand::ExportCsv { respond_to } => {
                let result = self.usage_view().await.map(|usage| to_csv(&usage));
                let _ = respond_to.send(result);
            }
            TrackerCommand::Import { data, respond_to } => {
                let result = self.handle_import(&data).await;
                let _ = respond_to.send(result);
            }
            TrackerCommand::GetConstraints { respond_to } => {
                let result = store::load_constraints(self.store.as_ref())
                    .await
                    .map_err(TrackerError::from);
                let _ = respond_to.send(result);
            }
            TrackerCommand::SetConstraint {
                constraint,
                respond_to,
            } => {
                let result = self.handle_set_constraint(constraint).await;
                let _ = respond_to.send(result);
            }
            TrackerCommand::RemoveConstraint { domain, respond_to } => {
                let result = self.handle_remove_constraint(&domain).await;
                let _ = respond_to.send(result);
            }
            TrackerCommand::GetLimitStatus { respond_to } => {
                let result = self.handle_get_limit_status().await;
                let _ = respond_to.send(result);
            }
            TrackerCommand::GetTotals { range, respond_to } => {
                let result = self.handle_get_totals(range).await;
                let _ = respond_to.send(result);
            }
            TrackerCommand::CurrentSession { respond_to } => {
                let _ = respond_to.send(self.current.clone());
            }
            TrackerCommand::Flush { respond_to } => {
                let result = self.flush().await;
                if let Some(tx) = respond_to {
                    let _ = tx.send(result);
                }
            }
            TrackerCommand::Shutdown { respond_to } => {
                info!("Tracker shutting down");
                self.close_session().await;
                let _ = self.flush().await;
                if !self.aggregator.is_empty() {
                    warn!("Usage buffer could not be flushed before shutdown");
                }
                let _ = respond_to.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    // ========================================================================
    // Session State Machine
    // ========================================================================

    async fn handle_signal(&mut self, signal: Signal) {
        debug!(signal = signal.name(), idle = self.idle, "Processing signal");

        match signal {
            Signal::TargetFocused { target_id } => {
                let target = self.host.target(&target_id).await;
                self.activate(target).await;
            }
            Signal::WindowFocused { window_id } => {
                let target = self.host.active_target(&window_id).await;
                self.activate(target).await;
            }
            Signal::FocusLost => {
                self.close_session().await;
            }
            Signal::Navigated { target_id } => {
                if !self.is_current(&target_id) {
                    debug!(target_id = %target_id, "Ignoring navigation of inactive target");
                    return;
                }
                let target = self.host.target(&target_id).await;
                if self.is_unchanged(target.as_ref()) {
                    debug!(target_id = %target_id, "Resource unchanged, keeping session");
                    return;
                }
                self.activate(target).await;
            }
            Signal::TargetRemoved { target_id } => {
                if self.is_current(&target_id) {
                    self.close_session().await;
                }
            }
            Signal::IdleStateChanged(state) if state.is_away() => {
                info!(state = %state, "Host went idle");
                self.idle = true;
                self.close_session().await;
            }
            Signal::IdleStateChanged(_) => {
                let was_idle = std::mem::replace(&mut self.idle, false);
                if !was_idle && self.current.is_some() {
                    debug!("Ignoring active signal while a session is open");
                    return;
                }
                info!("Host active again");
                let target = self.host.focused_target().await;
                self.activate(target).await;
            }
        }
    }

    fn is_current(&self, target_id: &TargetId) -> bool {
        self.current
            .as_ref()
            .is_some_and(|session| &session.target_id == target_id)
    }

    /// True when `target` still shows the resource of the open session.
    fn is_unchanged(&self, target: Option<&TargetInfo>) -> bool {
        match (target, self.current.as_ref()) {
            (Some(target), Some(session)) => {
                target.resource.as_deref() == Some(session.resource.as_str())
            }
            _ => false,
        }
    }

    /// Closes the open session, then opens one on `target` if eligible.
    async fn activate(&mut self, target: Option<TargetInfo>) {
        self.close_session().await;

        if self.idle {
            debug!("Not opening a session while idle");
            return;
        }
        if self.settings.tracking_paused {
            debug!("Not opening a session while paused");
            return;
        }
        let Some(target) = target else {
            debug!("Target metadata unavailable, staying idle");
            return;
        };
        let Some(resource) = target.resource.filter(|r| is_trackable(r)) else {
            debug!(target_id = %target.id, "Resource not trackable, staying idle");
            return;
        };

        let session = Session::open(target.id, resource, self.clock.now());
        info!(
            target_id = %session.target_id,
            domain = %session.domain,
            "Session opened"
        );

        let marker = LastActive::from(&session);
        if let Err(e) = store::save_last_active(self.store.as_ref(), &marker).await {
            warn!(error = %e, "Failed to write last-active marker");
        }

        let _ = self.event_publisher.send(TrackerEvent::SessionOpened {
            session: session.clone(),
        });
        self.current = Some(session);
    }

    /// Closes the open session (if any), buffers its time, and flushes.
    async fn close_session(&mut self) {
        let Some(session) = self.current.take() else {
            return;
        };

        let now = self.clock.now();
        let seconds = session.elapsed_seconds(now);
        if seconds > 0 {
            let day = day_key(now, self.settings.reference_timezone());
            self.aggregator
                .record(&day, &session.domain, seconds, &session.resource);
        }

        info!(
            target_id = %session.target_id,
            domain = %session.domain,
            seconds,
            "Session closed"
        );
        let _ = self.event_publisher.send(TrackerEvent::SessionClosed {
            domain: session.domain,
            resource: session.resource,
            seconds,
        });

        // Failure is logged by the aggregator; the buffer waits for the next flush.
        let _ = self.flush().await;
    }

    async fn flush(&mut self) -> Result<(), TrackerError> {
        match self.aggregator.flush(self.store.as_ref()).await? {
            FlushOutcome::Empty => {}
            FlushOutcome::Written { records } => debug!(records, "Flush complete"),
        }
        Ok(())
    }

    // ========================================================================
    // Settings
    // ========================================================================

    async fn handle_set_paused(&mut self, paused: bool) -> Result<Settings, TrackerError> {
        let next = Settings {
            tracking_paused: paused,
            ..self.settings.clone()
        };
        // The pause takes effect even when it cannot be persisted.
        let saved = store::save_settings(self.store.as_ref(), &next).await;
        self.apply_settings(next).await;
        if let Err(e) = saved {
            warn!(error = %e, paused, "Failed to persist tracking state");
            return Err(e.into());
        }
        Ok(self.settings.clone())
    }

    async fn handle_set_settings(
        &mut self,
        overrides: &Map<String, Value>,
    ) -> Result<Settings, TrackerError> {
        let next = self.settings.merged(overrides)?;
        store::save_settings(self.store.as_ref(), &next).await?;
        self.apply_settings(next).await;
        Ok(self.settings.clone())
    }

    /// Swaps in new settings and carries out whatever changed.
    async fn apply_settings(&mut self, next: Settings) {
        let previous = std::mem::replace(&mut self.settings, next);

        if previous.tracking_paused != self.settings.tracking_paused {
            if self.settings.tracking_paused {
                info!("Tracking paused");
                self.close_session().await;
            } else {
                info!("Tracking resumed");
                if !self.idle {
                    let target = self.host.focused_target().await;
                    self.activate(target).await;
                }
            }
        }

        if previous.idle_timeout_seconds != self.settings.idle_timeout_seconds {
            info!(
                seconds = self.settings.idle_timeout_seconds,
                "Reconfiguring idle detection"
            );
            self.host
                .set_idle_threshold(self.settings.idle_timeout_seconds)
                .await;
        }

        if previous.flush_interval_seconds != self.settings.flush_interval_seconds {
            self.flush_interval
                .send_replace(self.settings.flush_interval());
        }

        let _ = self.event_publisher.send(TrackerEvent::SettingsChanged {
            settings: self.settings.clone(),
        });
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Stored usage plus anything still buffered.
    ///
    /// Tries a flush first so the stored table is as current as possible.
    async fn usage_view(&mut self) -> Result<UsageTable, TrackerError> {
        let _ = self.flush().await;
        let mut usage = store::load_usage(self.store.as_ref()).await?;
        usage.merge(self.aggregator.pending());
        Ok(usage)
    }

    fn today_key(&self) -> String {
        day_key(self.clock.now(), self.settings.reference_timezone())
    }

    async fn handle_get_today_stats(&mut self) -> Result<TodayStats, TrackerError> {
        let usage = self.usage_view().await?;
        Ok(TodayStats {
            day_key: self.today_key(),
            usage,
            settings: self.settings.clone(),
        })
    }

    async fn handle_get_totals(&mut self, range: UsageRange) -> Result<RangeTotals, TrackerError> {
        let usage = self.usage_view().await?;
        let today = local_date(self.clock.now(), self.settings.reference_timezone());
        Ok(usage.totals(range, today))
    }

    async fn handle_get_limit_status(&mut self) -> Result<Vec<LimitReport>, TrackerError> {
        let constraints = store::load_constraints(self.store.as_ref()).await?;
        let usage = self.usage_view().await?;
        Ok(evaluate_all(&constraints, &usage.seconds_on(&self.today_key())))
    }

    // ========================================================================
    // Constraints
    // ========================================================================

    async fn handle_set_constraint(
        &mut self,
        constraint: Constraint,
    ) -> Result<ConstraintSet, TrackerError> {
        constraint.validate()?;
        let mut constraints = store::load_constraints(self.store.as_ref()).await?;
        info!(
            domain = %constraint.domain,
            limit = constraint.limit,
            unit = %constraint.unit,
            enabled = constraint.enabled,
            "Setting constraint"
        );
        constraints.insert(constraint.domain.clone(), constraint);
        store::save_constraints(self.store.as_ref(), &constraints).await?;
        Ok(constraints)
    }

    async fn handle_remove_constraint(
        &mut self,
        domain: &str,
    ) -> Result<ConstraintSet, TrackerError> {
        let mut constraints = store::load_constraints(self.store.as_ref()).await?;
        if constraints.remove(domain).is_none() {
            return Err(DomainError::InvalidConstraint {
                domain: domain.to_string(),
                reason: "no constraint for this domain".to_string(),
            }
            .into());
        }
        store::save_constraints(self.store.as_ref(), &constraints).await?;
        info!(domain, "Removed constraint");
        Ok(constraints)
    }

    // ========================================================================
    // Export / Import
    // ========================================================================

    async fn handle_export_all(&mut self) -> Result<Snapshot, TrackerError> {
        let usage = self.usage_view().await?;
        let last_active = store::load_last_active(self.store.as_ref()).await?;
        let constraints = store::load_constraints(self.store.as_ref()).await?;
        Ok(Snapshot {
            usage: Some(usage),
            settings: Some(self.settings.clone()),
            last_active,
            constraints: Some(constraints),
        })
    }

    /// Validates `data` completely, then writes every record it carries.
    ///
    /// Buffered time is flushed first; if that fails nothing is written.
    async fn handle_import(&mut self, data: &Value) -> Result<usize, TrackerError> {
        let snapshot = Snapshot::parse(data)?;
        self.flush().await?;

        let mut records = Vec::with_capacity(snapshot.record_count());
        if let Some(usage) = &snapshot.usage {
            records.push(store::encode(RecordKey::Usage, usage)?);
        }
        if let Some(settings) = &snapshot.settings {
            records.push(store::encode(RecordKey::Settings, settings)?);
        }
        if let Some(marker) = &snapshot.last_active {
            records.push(store::encode(RecordKey::LastActive, marker)?);
        }
        if let Some(constraints) = &snapshot.constraints {
            records.push(store::encode(RecordKey::Constraints, constraints)?);
        }

        let count = records.len();
        self.store.set_many(records).await?;
        info!(records = count, "Imported snapshot");

        if let Some(settings) = snapshot.settings {
            self.apply_settings(settings).await;
        }
        Ok(count)
    }

    #[cfg(test)]
    pub(crate) fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostMirror;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tokio::sync::oneshot;
    use webclock_core::{IdleState, LimitStatus, LimitUnit, ManualClock, WindowId};

    struct Harness {
        actor: TrackerActor,
        host: Arc<HostMirror>,
        store: MemoryStore,
        clock: ManualClock,
        events: broadcast::Receiver<TrackerEvent>,
    }

    fn create_actor() -> Harness {
        let (_cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, events) = broadcast::channel(64);
        let (interval_tx, _) = watch::channel(Duration::from_secs(60));
        let host = Arc::new(HostMirror::new());
        let store = MemoryStore::new();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let actor = TrackerActor::new(
            cmd_rx,
            host.clone(),
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            event_tx,
            interval_tx,
        );
        Harness {
            actor,
            host,
            store,
            clock,
            events,
        }
    }

    async fn signal(actor: &mut TrackerActor, signal: Signal) -> Option<Session> {
        let (tx, rx) = oneshot::channel();
        let _ = actor
            .handle_command(TrackerCommand::Signal {
                signal,
                respond_to: tx,
            })
            .await;
        rx.await.unwrap()
    }

    async fn focus(h: &mut Harness, target: &str, resource: &str) -> Option<Session> {
        h.host
            .target_focused(
                TargetId::new(target),
                WindowId::new("w1"),
                Some(resource.to_string()),
            )
            .await;
        signal(
            &mut h.actor,
            Signal::TargetFocused {
                target_id: TargetId::new(target),
            },
        )
        .await
    }

    async fn stored_usage(store: &MemoryStore) -> UsageTable {
        store::load_usage(store).await.unwrap()
    }

    #[tokio::test]
    async fn test_focus_opens_session() {
        let mut h = create_actor();
        let session = focus(&mut h, "1", "https://a.example/x").await.unwrap();
        assert_eq!(session.domain, "a.example");
        assert_eq!(session.start_time, h.clock.now());
        assert!(h.store.peek(RecordKey::LastActive).is_some());
        assert!(matches!(
            h.events.try_recv().unwrap(),
            TrackerEvent::SessionOpened { .. }
        ));
    }

    #[tokio::test]
    async fn test_switching_targets_attributes_time() {
        let mut h = create_actor();
        focus(&mut h, "1", "https://a.example/").await;
        h.clock.advance_secs(42);
        focus(&mut h, "2", "https://b.example/").await;
        h.clock.advance_secs(10);
        focus(&mut h, "1", "https://a.example/").await;
        h.clock.advance_secs(3);
        signal(&mut h.actor, Signal::FocusLost).await;

        let usage = stored_usage(&h.store).await;
        let a = usage.get("2024-05-01", "a.example").unwrap();
        assert_eq!(a.seconds, 45);
        assert_eq!(a.visits, 2);
        assert_eq!(usage.get("2024-05-01", "b.example").unwrap().seconds, 10);
        assert!(h.actor.current().is_none());
    }

    #[tokio::test]
    async fn test_zero_duration_session_contributes_nothing() {
        let mut h = create_actor();
        focus(&mut h, "1", "https://a.example/").await;
        focus(&mut h, "2", "https://b.example/").await;
        let usage = stored_usage(&h.store).await;
        assert!(usage.get("2024-05-01", "a.example").is_none());
    }

    #[tokio::test]
    async fn test_untrackable_focus_closes_and_stays_idle() {
        let mut h = create_actor();
        focus(&mut h, "1", "https://a.example/").await;
        h.clock.advance_secs(5);
        let session = focus(&mut h, "2", "chrome://settings/").await;
        assert!(session.is_none());
        assert_eq!(
            stored_usage(&h.store).await.get("2024-05-01", "a.example").unwrap().seconds,
            5
        );
    }

    #[tokio::test]
    async fn test_missing_target_metadata_is_idle() {
        let mut h = create_actor();
        let session = signal(
            &mut h.actor,
            Signal::TargetFocused {
                target_id: TargetId::new("ghost"),
            },
        )
        .await;
        assert!(session.is_none());
    }

    #[tokio::test]
    async fn test_navigation_of_current_target_splits_session() {
        let mut h = create_actor();
        focus(&mut h, "1", "https://a.example/one").await;
        h.clock.advance_secs(7);

        h.host
            .target_updated(TargetId::new("1"), "https://c.example/two".to_string())
            .await;
        let session = signal(
            &mut h.actor,
            Signal::Navigated {
                target_id: TargetId::new("1"),
            },
        )
        .await
        .unwrap();

        assert_eq!(session.domain, "c.example");
        let usage = stored_usage(&h.store).await;
        let a = usage.get("2024-05-01", "a.example").unwrap();
        assert_eq!(a.pages.get("https://a.example/one"), Some(&7));
    }

    #[tokio::test]
    async fn test_navigation_to_same_resource_keeps_session() {
        let mut h = create_actor();
        let opened = focus(&mut h, "1", "https://a.example/x").await.unwrap();
        h.clock.advance_secs(6);

        h.host
            .target_updated(TargetId::new("1"), "https://a.example/x".to_string())
            .await;
        let session = signal(
            &mut h.actor,
            Signal::Navigated {
                target_id: TargetId::new("1"),
            },
        )
        .await
        .unwrap();

        assert_eq!(session, opened);
        assert!(stored_usage(&h.store).await.is_empty());
    }

    #[tokio::test]
    async fn test_navigation_of_other_target_ignored() {
        let mut h = create_actor();
        let opened = focus(&mut h, "1", "https://a.example/").await.unwrap();
        h.clock.advance_secs(4);
        let session = signal(
            &mut h.actor,
            Signal::Navigated {
                target_id: TargetId::new("2"),
            },
        )
        .await
        .unwrap();
        assert_eq!(session, opened);
    }

    #[tokio::test]
    async fn test_removal_of_current_target_closes() {
        let mut h = create_actor();
        focus(&mut h, "1", "https://a.example/").await;
        h.clock.advance_secs(2);

        let still_open = signal(
            &mut h.actor,
            Signal::TargetRemoved {
                target_id: TargetId::new("9"),
            },
        )
        .await;
        assert!(still_open.is_some());

        let closed = signal(
            &mut h.actor,
            Signal::TargetRemoved {
                target_id: TargetId::new("1"),
            },
        )
        .await;
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn test_idle_scenario() {
        let mut h = create_actor();
        focus(&mut h, "1", "https://a.example/").await;
        h.clock.advance_secs(10);
        signal(&mut h.actor, Signal::IdleStateChanged(IdleState::Idle)).await;

        // Focus changes while idle never open a session.
        h.clock.advance_secs(5);
        assert!(focus(&mut h, "1", "https://a.example/").await.is_none());

        h.clock.advance_secs(15);
        let session = signal(&mut h.actor, Signal::IdleStateChanged(IdleState::Active))
            .await
            .unwrap();
        assert_eq!(session.start_time, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 30).unwrap());

        let usage = stored_usage(&h.store).await;
        let a = usage.get("2024-05-01", "a.example").unwrap();
        assert_eq!(a.seconds, 10);
        assert_eq!(a.visits, 1);
    }

    #[tokio::test]
    async fn test_duplicate_active_signal_keeps_session() {
        let mut h = create_actor();
        let opened = focus(&mut h, "1", "https://a.example/").await.unwrap();
        h.clock.advance_secs(3);
        let session = signal(&mut h.actor, Signal::IdleStateChanged(IdleState::Active))
            .await
            .unwrap();
        assert_eq!(session, opened);
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let mut h = create_actor();
        focus(&mut h, "1", "https://a.example/").await;
        h.clock.advance_secs(8);

        let (tx, rx) = oneshot::channel();
        let _ = h
            .actor
            .handle_command(TrackerCommand::SetPaused {
                paused: true,
                respond_to: tx,
            })
            .await;
        assert!(rx.await.unwrap().unwrap().tracking_paused);
        assert!(h.actor.current().is_none());

        // Paused: focus is ignored.
        assert!(focus(&mut h, "1", "https://a.example/").await.is_none());

        let (tx, rx) = oneshot::channel();
        let _ = h
            .actor
            .handle_command(TrackerCommand::SetPaused {
                paused: false,
                respond_to: tx,
            })
            .await;
        assert!(!rx.await.unwrap().unwrap().tracking_paused);
        assert_eq!(h.actor.current().unwrap().domain, "a.example");

        let stored = h.store.peek(RecordKey::Settings).unwrap();
        assert_eq!(stored["tracking_paused"], json!(false));
    }

    #[tokio::test]
    async fn test_pause_applies_when_settings_write_fails() {
        let mut h = create_actor();
        focus(&mut h, "1", "https://a.example/").await;
        h.clock.advance_secs(8);

        h.store.fail_next_writes(1);
        let result = h.actor.handle_set_paused(true).await;
        assert!(matches!(result, Err(TrackerError::Store(_))));
        assert!(h.actor.settings.tracking_paused);
        assert!(h.actor.current().is_none());

        // Paused in memory: focus is ignored and the closed time was kept.
        assert!(focus(&mut h, "1", "https://a.example/").await.is_none());
        let usage = stored_usage(&h.store).await;
        assert_eq!(usage.get("2024-05-01", "a.example").unwrap().seconds, 8);
    }

    #[tokio::test]
    async fn test_set_settings_reconfigures_idle_threshold() {
        let mut h = create_actor();
        let (tx, rx) = oneshot::channel();
        let overrides = match json!({"idle_timeout_seconds": 300, "unknown": 1}) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        let _ = h
            .actor
            .handle_command(TrackerCommand::SetSettings {
                overrides,
                respond_to: tx,
            })
            .await;
        let settings = rx.await.unwrap().unwrap();
        assert_eq!(settings.idle_timeout_seconds, 300);
        assert_eq!(h.host.idle_threshold().await, 300);
    }

    #[tokio::test]
    async fn test_set_settings_rejects_bad_type() {
        let mut h = create_actor();
        let (tx, rx) = oneshot::channel();
        let overrides = match json!({"tracking_paused": "yes"}) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        let _ = h
            .actor
            .handle_command(TrackerCommand::SetSettings {
                overrides,
                respond_to: tx,
            })
            .await;
        assert!(matches!(rx.await.unwrap(), Err(TrackerError::Domain(_))));
        assert!(h.store.peek(RecordKey::Settings).is_none());
    }

    #[tokio::test]
    async fn test_flush_failure_retained_and_retried() {
        let mut h = create_actor();
        focus(&mut h, "1", "https://a.example/").await;
        h.clock.advance_secs(20);

        h.store.fail_next_writes(1);
        signal(&mut h.actor, Signal::FocusLost).await;
        assert!(stored_usage(&h.store).await.is_empty());

        let (tx, rx) = oneshot::channel();
        let _ = h
            .actor
            .handle_command(TrackerCommand::Flush {
                respond_to: Some(tx),
            })
            .await;
        rx.await.unwrap().unwrap();

        let usage = stored_usage(&h.store).await;
        let a = usage.get("2024-05-01", "a.example").unwrap();
        assert_eq!(a.seconds, 20);
        assert_eq!(a.visits, 1);
    }

    #[tokio::test]
    async fn test_limit_status_uses_today() {
        let mut h = create_actor();
        focus(&mut h, "1", "https://a.example/").await;
        h.clock.advance_secs(2880);
        signal(&mut h.actor, Signal::FocusLost).await;

        let (tx, rx) = oneshot::channel();
        let _ = h
            .actor
            .handle_command(TrackerCommand::SetConstraint {
                constraint: Constraint::new("a.example", 60, LimitUnit::Minutes),
                respond_to: tx,
            })
            .await;
        assert_eq!(rx.await.unwrap().unwrap().len(), 1);

        let (tx, rx) = oneshot::channel();
        let _ = h
            .actor
            .handle_command(TrackerCommand::GetLimitStatus { respond_to: tx })
            .await;
        let reports = rx.await.unwrap().unwrap();
        assert_eq!(reports[0].used_seconds, 2880);
        assert_eq!(reports[0].status, LimitStatus::Warning);
    }

    #[tokio::test]
    async fn test_import_rejects_malformed_and_keeps_state() {
        let mut h = create_actor();
        focus(&mut h, "1", "https://a.example/").await;
        h.clock.advance_secs(5);
        signal(&mut h.actor, Signal::FocusLost).await;
        let before = h.store.peek(RecordKey::Usage);

        let (tx, rx) = oneshot::channel();
        let _ = h
            .actor
            .handle_command(TrackerCommand::Import {
                data: json!({"usage": "not a table"}),
                respond_to: tx,
            })
            .await;
        assert!(rx.await.unwrap().is_err());
        assert_eq!(h.store.peek(RecordKey::Usage), before);
    }

    #[tokio::test]
    async fn test_shutdown_closes_and_flushes() {
        let mut h = create_actor();
        focus(&mut h, "1", "https://a.example/").await;
        h.clock.advance_secs(30);

        let (tx, rx) = oneshot::channel();
        let flow = h
            .actor
            .handle_command(TrackerCommand::Shutdown { respond_to: tx })
            .await;
        rx.await.unwrap();
        assert!(flow.is_break());
        assert_eq!(
            stored_usage(&h.store).await.get("2024-05-01", "a.example").unwrap().seconds,
            30
        );
    }

    #[tokio::test]
    async fn test_initialize_loads_stored_settings() {
        let mut h = create_actor();
        h.store
            .set(
                RecordKey::Settings,
                json!({"tracking_paused": true, "idle_timeout_seconds": 45}),
            )
            .await
            .unwrap();
        h.actor.initialize().await;
        assert_eq!(h.host.idle_threshold().await, 45);
        assert!(focus(&mut h, "1", "https://a.example/").await.is_none());
    }
}
