//! Focus tracker using the Actor pattern.
//!
//! The tracker owns the single open session and the usage buffer. It
//! receives host signals and presentation commands over one mpsc channel,
//! so every transition is processed in arrival order.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │  Host bridge /  │────▶│  TrackerActor   │────▶│ Broadcast Channel│
//! │  CLI commands   │     │                 │     │                  │
//! └─────────────────┘     └────────┬────────┘     └──────────────────┘
//!         │                        │                       │
//!         │   TrackerCommand       │  flush on close       │  TrackerEvent
//!         │   (mpsc channel)       │  and on timer         │
//!         ▼                        ▼                       ▼
//!   signals, queries          StateStore             subscribers
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

use webclock_core::settings::DEFAULT_FLUSH_INTERVAL_SECS;
use webclock_core::Clock;

use crate::host::Host;
use crate::store::StateStore;

mod actor;
mod aggregator;
mod commands;
mod handle;

pub use actor::TrackerActor;
pub use aggregator::{Aggregator, FlushOutcome};
pub use commands::{Signal, TrackerCommand, TrackerError, TrackerEvent};
pub use handle::TrackerHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Spawn the tracker actor and return a handle for interaction.
///
/// This function:
/// 1. Creates command, event and flush-interval channels
/// 2. Spawns the TrackerActor on a tokio task
/// 3. Spawns the periodic flush task
/// 4. Returns a TrackerHandle for client use
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use webclock_core::SystemClock;
/// use webclockd::host::HostMirror;
/// use webclockd::store::JsonFileStore;
/// use webclockd::tracker::spawn_tracker;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_tracker(
///         Arc::new(HostMirror::new()),
///         Arc::new(JsonFileStore::new("/tmp/webclock-state.json")),
///         Arc::new(SystemClock),
///     );
///
///     let stats = handle.today_stats().await;
/// }
/// ```
pub fn spawn_tracker(
    host: Arc<dyn Host>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
) -> TrackerHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
    let (interval_tx, interval_rx) =
        watch::channel(Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS));

    let actor = TrackerActor::new(cmd_rx, host, store, clock, event_tx.clone(), interval_tx);
    tokio::spawn(actor.run());

    spawn_flush_task(cmd_tx.clone(), interval_rx);

    TrackerHandle::new(cmd_tx, event_tx)
}

fn flush_ticker(period: Duration) -> Interval {
    // First tick one period from now, not immediately.
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Spawn a background task that triggers periodic flushes.
///
/// The period follows the `flush_interval_seconds` setting; the actor
/// publishes changes through `interval_rx`.
fn spawn_flush_task(
    sender: mpsc::Sender<TrackerCommand>,
    mut interval_rx: watch::Receiver<Duration>,
) {
    tokio::spawn(async move {
        let mut ticker = flush_ticker(*interval_rx.borrow_and_update());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Fire-and-forget flush command
                    if sender.send(TrackerCommand::Flush { respond_to: None }).await.is_err() {
                        debug!("Flush task stopping: tracker channel closed");
                        break;
                    }
                }
                changed = interval_rx.changed() => {
                    if changed.is_err() {
                        debug!("Flush task stopping: tracker dropped");
                        break;
                    }
                    let period = *interval_rx.borrow_and_update();
                    ticker = flush_ticker(period);
                    debug!(seconds = period.as_secs(), "Flush interval changed");
                }
            }
        }
    });
}
