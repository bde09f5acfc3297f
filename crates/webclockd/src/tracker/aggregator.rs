//! In-memory usage buffer and flush-merge against the durable table.

use tracing::{debug, warn};

use webclock_core::UsageTable;

use crate::store::{self, StateStore, StoreError};

/// What a flush did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The buffer was empty; storage was not touched.
    Empty,
    /// The buffer was merged and written; it is now empty.
    Written { records: usize },
}

/// Accumulates closed-session deltas until they are flushed.
#[derive(Debug, Default)]
pub struct Aggregator {
    buffer: UsageTable,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one closed session to the buffer. Never fails.
    pub fn record(&mut self, day_key: &str, domain: &str, seconds: u64, resource: &str) {
        self.buffer.record(day_key, domain, seconds, resource);
    }

    /// Deltas not yet written.
    pub fn pending(&self) -> &UsageTable {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Merges the buffer into the stored table and writes it back.
    ///
    /// The buffer is cleared only after the write succeeds. On any error
    /// it is kept whole, so retrying later adds each delta exactly once.
    pub async fn flush(&mut self, store: &dyn StateStore) -> Result<FlushOutcome, StoreError> {
        if self.buffer.is_empty() {
            return Ok(FlushOutcome::Empty);
        }

        let records = self.buffer.record_count();
        let mut stored = store::load_usage(store).await.map_err(|e| {
            warn!(error = %e, pending = records, "Flush aborted: could not read usage table");
            e
        })?;
        stored.merge(&self.buffer);

        if let Err(e) = store::save_usage(store, &stored).await {
            warn!(error = %e, pending = records, "Flush failed, keeping buffer for retry");
            return Err(e);
        }

        self.buffer = UsageTable::new();
        debug!(records, "Flushed usage buffer");
        Ok(FlushOutcome::Written { records })
    }
}
