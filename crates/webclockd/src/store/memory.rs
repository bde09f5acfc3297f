//! In-memory store with failure injection, for tests and ephemeral runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use super::{RecordKey, StateStore, StoreError};

#[derive(Default)]
struct Inner {
    records: Mutex<HashMap<RecordKey, Value>>,
    failing_writes: AtomicUsize,
    failing_reads: AtomicBool,
    writes: AtomicUsize,
}

/// A [`StateStore`] holding records in memory.
///
/// Cloning shares the records, so a test can inspect what the tracker wrote.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` writes fail with [`StoreError::Unavailable`].
    pub fn fail_next_writes(&self, count: usize) {
        self.inner.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Makes every read fail until switched off.
    pub fn fail_reads(&self, failing: bool) {
        self.inner.failing_reads.store(failing, Ordering::SeqCst);
    }

    /// Number of successful `set_many` calls.
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Returns a record without going through the trait.
    pub fn peek(&self, key: RecordKey) -> Option<Value> {
        self.records().get(&key).cloned()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<RecordKey, Value>> {
        self.inner
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: RecordKey) -> Result<Option<Value>, StoreError> {
        if self.inner.failing_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("read of '{key}' refused")));
        }
        Ok(self.records().get(&key).cloned())
    }

    async fn set_many(&self, records: Vec<(RecordKey, Value)>) -> Result<(), StoreError> {
        let refused = self
            .inner
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(StoreError::Unavailable("write refused".to_string()));
        }

        let mut stored = self.records();
        for (key, value) in records {
            stored.insert(key, value);
        }
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fail_next_writes_counts_down() {
        let store = MemoryStore::new();
        store.fail_next_writes(2);

        assert!(store.set(RecordKey::Usage, json!({})).await.is_err());
        assert!(store.set(RecordKey::Usage, json!({})).await.is_err());
        assert!(store.set(RecordKey::Usage, json!({})).await.is_ok());
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_fail_reads() {
        let store = MemoryStore::new();
        store.fail_reads(true);
        assert!(store.get(RecordKey::Settings).await.is_err());
        store.fail_reads(false);
        assert_eq!(store.get(RecordKey::Settings).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clones_share_records() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.set(RecordKey::Constraints, json!({})).await.unwrap();
        assert_eq!(other.peek(RecordKey::Constraints), Some(json!({})));
    }
}
