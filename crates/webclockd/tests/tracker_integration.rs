//! Integration tests for the tracker actor.
//!
//! These drive a spawned tracker through its handle, the way the socket
//! server does, with a manual clock so durations are exact.
//!
//! Tests CAN use `.unwrap()` and `.expect()`; production code cannot.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::broadcast;

use webclock_core::{
    Clock, Constraint, IdleState, LimitStatus, LimitUnit, ManualClock, TargetId, UsageRange,
    WindowId, CSV_HEADER,
};
use webclockd::host::HostMirror;
use webclockd::store::{JsonFileStore, MemoryStore, StateStore};
use webclockd::tracker::{spawn_tracker, Signal, TrackerError, TrackerEvent, TrackerHandle};

const TODAY: &str = "2024-05-01";

// ============================================================================
// Test Helpers
// ============================================================================

struct Fixture {
    tracker: TrackerHandle,
    host: Arc<HostMirror>,
    clock: ManualClock,
}

fn start_clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap())
}

fn spawn_with(store: Arc<dyn StateStore>, clock: ManualClock) -> Fixture {
    let host = Arc::new(HostMirror::new());
    let tracker = spawn_tracker(host.clone(), store, Arc::new(clock.clone()));
    Fixture {
        tracker,
        host,
        clock,
    }
}

fn spawn_memory() -> (Fixture, MemoryStore) {
    let store = MemoryStore::new();
    (spawn_with(Arc::new(store.clone()), start_clock()), store)
}

impl Fixture {
    /// Reports a target as focused in window "w1" and signals the tracker.
    async fn focus(&self, target: &str, resource: &str) {
        self.host
            .target_focused(
                TargetId::new(target),
                WindowId::new("w1"),
                Some(resource.to_string()),
            )
            .await;
        self.tracker
            .signal(Signal::TargetFocused {
                target_id: TargetId::new(target),
            })
            .await
            .unwrap();
    }

    async fn navigate(&self, target: &str, resource: &str) {
        self.host
            .target_updated(TargetId::new(target), resource.to_string())
            .await;
        self.tracker
            .signal(Signal::Navigated {
                target_id: TargetId::new(target),
            })
            .await
            .unwrap();
    }

    async fn lose_focus(&self) {
        self.host.window_focus_changed(None).await;
        self.tracker.signal(Signal::FocusLost).await.unwrap();
    }

    async fn idle(&self, state: IdleState) {
        self.tracker
            .signal(Signal::IdleStateChanged(state))
            .await
            .unwrap();
    }

    fn wait(&self, secs: i64) {
        self.clock.advance_secs(secs);
    }
}

fn drain_closed_seconds(events: &mut broadcast::Receiver<TrackerEvent>) -> u64 {
    let mut total = 0;
    while let Ok(event) = events.try_recv() {
        if let TrackerEvent::SessionClosed { seconds, .. } = event {
            total += seconds;
        }
    }
    total
}

// ============================================================================
// Attribution
// ============================================================================

#[tokio::test]
async fn test_switching_between_two_sites() {
    let (fx, _store) = spawn_memory();

    fx.focus("1", "https://a.example/inbox").await;
    fx.wait(30);
    fx.focus("2", "https://b.example/").await;
    fx.wait(10);
    fx.focus("1", "https://a.example/inbox").await;
    fx.wait(15);
    fx.lose_focus().await;

    let stats = fx.tracker.today_stats().await.unwrap();
    assert_eq!(stats.day_key, TODAY);

    let a = stats.usage.get(TODAY, "a.example").unwrap();
    assert_eq!(a.seconds, 45);
    assert_eq!(a.visits, 2);
    assert_eq!(a.pages.get("https://a.example/inbox"), Some(&45));

    let b = stats.usage.get(TODAY, "b.example").unwrap();
    assert_eq!(b.seconds, 10);
    assert_eq!(b.visits, 1);
}

#[tokio::test]
async fn test_at_most_one_open_session() {
    let (fx, _store) = spawn_memory();

    fx.focus("1", "https://a.example/").await;
    fx.focus("2", "https://b.example/").await;

    let current = fx.tracker.current_session().await.unwrap().unwrap();
    assert_eq!(current.domain, "b.example");
    assert_eq!(current.target_id, TargetId::new("2"));

    fx.lose_focus().await;
    assert!(fx.tracker.current_session().await.unwrap().is_none());
}

#[tokio::test]
async fn test_closed_time_is_conserved() {
    let (fx, store) = spawn_memory();
    let mut events = fx.tracker.subscribe();

    fx.focus("1", "https://a.example/").await;
    fx.wait(12);
    fx.navigate("1", "https://a.example/other").await;
    fx.wait(7);
    fx.focus("2", "https://news.example.org/").await;
    fx.wait(40);
    fx.idle(IdleState::Locked).await;
    fx.tracker.flush().await.unwrap();

    let stored = webclockd::store::load_usage(&store).await.unwrap();
    assert_eq!(stored.total_seconds(), 59);
    assert_eq!(drain_closed_seconds(&mut events), 59);

    for (_, day) in stored.days() {
        for record in day.values() {
            assert!(record.is_consistent());
            assert_eq!(record.pages_total(), record.seconds);
        }
    }
}

#[tokio::test]
async fn test_reload_of_same_resource_is_one_visit() {
    let (fx, _store) = spawn_memory();

    fx.focus("1", "https://a.example/x").await;
    fx.wait(10);
    fx.navigate("1", "https://a.example/x").await;
    fx.wait(10);
    fx.lose_focus().await;

    let stats = fx.tracker.today_stats().await.unwrap();
    let a = stats.usage.get(TODAY, "a.example").unwrap();
    assert_eq!(a.seconds, 20);
    assert_eq!(a.visits, 1);
    assert_eq!(a.pages.get("https://a.example/x"), Some(&20));
}

#[tokio::test]
async fn test_untrackable_pages_are_not_counted() {
    let (fx, _store) = spawn_memory();

    fx.focus("1", "about:blank").await;
    fx.wait(30);
    assert!(fx.tracker.current_session().await.unwrap().is_none());

    fx.navigate("1", "https://a.example/").await;
    // Navigation of an idle target does not reopen; focus does.
    fx.focus("1", "https://a.example/").await;
    fx.wait(5);
    fx.lose_focus().await;

    let stats = fx.tracker.today_stats().await.unwrap();
    assert_eq!(stats.usage.total_seconds(), 5);
}

// ============================================================================
// Idle and Pause
// ============================================================================

#[tokio::test]
async fn test_idle_period_is_excluded() {
    let (fx, _store) = spawn_memory();

    fx.focus("1", "https://a.example/").await;
    fx.wait(20);
    fx.idle(IdleState::Idle).await;
    assert!(fx.tracker.current_session().await.unwrap().is_none());

    fx.wait(300);
    fx.idle(IdleState::Active).await;
    let reopened = fx.tracker.current_session().await.unwrap().unwrap();
    assert_eq!(reopened.start_time, fx.clock.now());

    fx.wait(5);
    fx.lose_focus().await;

    let stats = fx.tracker.today_stats().await.unwrap();
    let a = stats.usage.get(TODAY, "a.example").unwrap();
    assert_eq!(a.seconds, 25);
    assert_eq!(a.visits, 2);
}

#[tokio::test]
async fn test_paused_tracking_records_nothing() {
    let (fx, _store) = spawn_memory();

    fx.focus("1", "https://a.example/").await;
    fx.wait(10);
    let settings = fx.tracker.set_paused(true).await.unwrap();
    assert!(settings.tracking_paused);

    fx.focus("2", "https://b.example/").await;
    fx.wait(100);
    assert!(fx.tracker.current_session().await.unwrap().is_none());

    fx.tracker.set_paused(false).await.unwrap();
    // Resume reopens on the focused target.
    let current = fx.tracker.current_session().await.unwrap().unwrap();
    assert_eq!(current.domain, "b.example");

    let stats = fx.tracker.today_stats().await.unwrap();
    assert_eq!(stats.usage.total_seconds(), 10);
    assert!(stats.usage.get(TODAY, "b.example").is_none());
}

// ============================================================================
// Settings
// ============================================================================

#[tokio::test]
async fn test_settings_partial_update_and_threshold_directive() {
    let (fx, store) = spawn_memory();
    let mut directives = fx.host.subscribe();

    let updated = fx
        .tracker
        .set_settings(
            json!({"idle_timeout_seconds": 120, "unknown_key": true})
                .as_object()
                .cloned()
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(updated.idle_timeout_seconds, 120);
    assert!(!updated.tracking_paused);

    assert_eq!(fx.host.idle_threshold().await, 120);
    assert!(directives.try_recv().is_ok());

    let stored = webclockd::store::load_settings(&store).await.unwrap();
    assert_eq!(stored.idle_timeout_seconds, 120);
}

#[tokio::test]
async fn test_settings_rejects_wrong_type() {
    let (fx, _store) = spawn_memory();

    let result = fx
        .tracker
        .set_settings(
            json!({"idle_timeout_seconds": "soon"})
                .as_object()
                .cloned()
                .unwrap(),
        )
        .await;
    assert!(matches!(result, Err(TrackerError::Domain(_))));
    assert_eq!(fx.tracker.settings().await.unwrap().idle_timeout_seconds, 60);
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_failed_write_is_retried_without_double_counting() {
    let (fx, store) = spawn_memory();

    fx.focus("1", "https://a.example/").await;
    fx.wait(30);
    store.fail_next_writes(1);
    fx.lose_focus().await;
    assert!(webclockd::store::load_usage(&store).await.unwrap().is_empty());

    fx.tracker.flush().await.unwrap();
    fx.tracker.flush().await.unwrap();

    let stored = webclockd::store::load_usage(&store).await.unwrap();
    assert_eq!(stored.get(TODAY, "a.example").unwrap().seconds, 30);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_flush_retries_failed_write() {
    let (fx, store) = spawn_memory();

    fx.focus("1", "https://a.example/").await;
    fx.wait(10);
    store.fail_next_writes(1);
    fx.lose_focus().await;
    assert!(webclockd::store::load_usage(&store).await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_secs(61)).await;

    let stored = webclockd::store::load_usage(&store).await.unwrap();
    let a = stored.get(TODAY, "a.example").unwrap();
    assert_eq!(a.seconds, 10);
    assert_eq!(a.visits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_flush_follows_interval_setting() {
    let (fx, store) = spawn_memory();

    let settings = fx
        .tracker
        .set_settings(
            json!({"flush_interval_seconds": 300})
                .as_object()
                .cloned()
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(settings.flush_interval_seconds, 300);

    fx.focus("1", "https://a.example/").await;
    fx.wait(10);
    store.fail_next_writes(1);
    fx.lose_focus().await;

    // The old 60 s period no longer fires.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(webclockd::store::load_usage(&store).await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_secs(200)).await;
    let stored = webclockd::store::load_usage(&store).await.unwrap();
    assert_eq!(stored.get(TODAY, "a.example").unwrap().seconds, 10);
}

#[tokio::test]
async fn test_usage_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");

    let fx = spawn_with(Arc::new(JsonFileStore::new(&path)), start_clock());
    fx.focus("1", "https://a.example/").await;
    fx.wait(42);
    fx.tracker.shutdown().await.unwrap();

    let clock = start_clock();
    clock.advance_secs(3600);
    let fx = spawn_with(Arc::new(JsonFileStore::new(&path)), clock);
    fx.focus("1", "https://a.example/").await;
    fx.wait(8);
    fx.lose_focus().await;

    let stats = fx.tracker.today_stats().await.unwrap();
    let a = stats.usage.get(TODAY, "a.example").unwrap();
    assert_eq!(a.seconds, 50);
    assert_eq!(a.visits, 2);
}

#[tokio::test]
async fn test_export_then_import_into_fresh_store() {
    let dir = TempDir::new().unwrap();

    let source = spawn_with(
        Arc::new(JsonFileStore::new(dir.path().join("source.json"))),
        start_clock(),
    );
    source.focus("1", "https://a.example/").await;
    source.wait(90);
    source.lose_focus().await;
    source
        .tracker
        .set_constraint(Constraint::new("a.example", 2, LimitUnit::Minutes))
        .await
        .unwrap();

    let snapshot = source.tracker.export_all().await.unwrap();
    let csv = source.tracker.export_csv().await.unwrap();
    assert!(csv.starts_with(CSV_HEADER));
    assert!(csv.contains(&format!("{TODAY},a.example,90,1")));

    let target = spawn_with(
        Arc::new(JsonFileStore::new(dir.path().join("target.json"))),
        start_clock(),
    );
    let written = target
        .tracker
        .import(serde_json::to_value(&snapshot).unwrap())
        .await
        .unwrap();
    assert_eq!(written, snapshot.record_count());

    let stats = target.tracker.today_stats().await.unwrap();
    assert_eq!(stats.usage, snapshot.usage.unwrap());
    assert!(target
        .tracker
        .constraints()
        .await
        .unwrap()
        .contains_key("a.example"));
}

#[tokio::test]
async fn test_import_rejects_non_snapshot() {
    let (fx, _store) = spawn_memory();

    let result = fx.tracker.import(json!([1, 2, 3])).await;
    assert!(matches!(result, Err(TrackerError::Domain(_))));

    let result = fx.tracker.import(json!({"unrelated": 1})).await;
    assert!(matches!(result, Err(TrackerError::Domain(_))));
}

// ============================================================================
// Limits and Totals
// ============================================================================

#[tokio::test]
async fn test_limit_status_progression() {
    let (fx, _store) = spawn_memory();
    fx.tracker
        .set_constraint(Constraint::new("a.example", 1, LimitUnit::Minutes))
        .await
        .unwrap();

    fx.focus("1", "https://a.example/").await;
    fx.wait(30);
    fx.lose_focus().await;
    let reports = fx.tracker.limit_status().await.unwrap();
    assert_eq!(reports[0].status, LimitStatus::Active);
    assert_eq!(reports[0].percent, 50);

    fx.focus("1", "https://a.example/").await;
    fx.wait(20);
    fx.lose_focus().await;
    let reports = fx.tracker.limit_status().await.unwrap();
    assert_eq!(reports[0].status, LimitStatus::Warning);

    fx.focus("1", "https://a.example/").await;
    fx.wait(10);
    fx.lose_focus().await;
    let reports = fx.tracker.limit_status().await.unwrap();
    assert_eq!(reports[0].status, LimitStatus::Exceeded);
    assert_eq!(reports[0].percent, 100);

    let mut paused = Constraint::new("a.example", 1, LimitUnit::Minutes);
    paused.enabled = false;
    fx.tracker.set_constraint(paused).await.unwrap();
    let reports = fx.tracker.limit_status().await.unwrap();
    assert_eq!(reports[0].status, LimitStatus::Paused);
}

#[tokio::test]
async fn test_remove_constraint() {
    let (fx, _store) = spawn_memory();
    fx.tracker
        .set_constraint(Constraint::new("a.example", 3, LimitUnit::Hours))
        .await
        .unwrap();

    let remaining = fx
        .tracker
        .remove_constraint("a.example".to_string())
        .await
        .unwrap();
    assert!(remaining.is_empty());

    let again = fx.tracker.remove_constraint("a.example".to_string()).await;
    assert!(matches!(again, Err(TrackerError::Domain(_))));
}

#[tokio::test]
async fn test_totals_span_days() {
    let (fx, _store) = spawn_memory();

    fx.focus("1", "https://a.example/").await;
    fx.wait(60);
    fx.lose_focus().await;

    // Next day.
    fx.wait(24 * 3600);
    fx.focus("1", "https://a.example/").await;
    fx.wait(30);
    fx.focus("2", "https://b.example/").await;
    fx.wait(10);
    fx.lose_focus().await;

    let today = fx.tracker.totals(UsageRange::Today).await.unwrap();
    assert_eq!(today.total_seconds, 40);

    let week = fx.tracker.totals(UsageRange::Last7Days).await.unwrap();
    assert_eq!(week.total_seconds, 100);
    let ranked = week.ranked();
    assert_eq!(ranked[0].0, "a.example");
    assert_eq!(ranked[0].1.seconds, 90);
    assert_eq!(ranked[0].1.visits, 2);
}
