//! Durable key-value storage for tracker records.
//!
//! The tracker persists four records: the usage table, settings, the
//! last-active marker and the constraint set. Each is one JSON value
//! under a fixed key. Backends implement [`StateStore`]; the typed
//! helpers below are what the rest of the crate calls.
//!
//! An absent record reads as empty. A record that exists but cannot be
//! read or decoded is an error, never silently empty, so a flush after a
//! failed read cannot overwrite history with a fresh table.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use webclock_core::{ConstraintSet, LastActive, Settings, UsageTable};

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

// ============================================================================
// Record Keys
// ============================================================================

/// Keys of the records the tracker persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKey {
    Usage,
    Settings,
    LastActive,
    Constraints,
}

impl RecordKey {
    /// Every key, in a stable order.
    pub const ALL: [RecordKey; 4] = [
        RecordKey::Usage,
        RecordKey::Settings,
        RecordKey::LastActive,
        RecordKey::Constraints,
    ];

    /// Name of the record in the stored JSON object.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usage => "usage",
            Self::Settings => "settings",
            Self::LastActive => "last_active",
            Self::Constraints => "constraints",
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Store Errors
// ============================================================================

/// Errors from a storage backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(String),

    /// A record exists but does not decode
    #[error("stored record '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    /// A value could not be encoded for writing
    #[error("failed to encode record '{key}': {reason}")]
    Encode { key: String, reason: String },

    /// The backend refused the operation
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn io<E: std::fmt::Display>(err: E) -> Self {
        Self::Io(err.to_string())
    }
}

// ============================================================================
// State Store Trait
// ============================================================================

/// A durable key-value store holding JSON records.
///
/// The daemon is the only writer. `set_many` must apply all records or
/// none of them.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads one record. `Ok(None)` means it has never been written.
    async fn get(&self, key: RecordKey) -> Result<Option<Value>, StoreError>;

    /// Writes several records in one step.
    async fn set_many(&self, records: Vec<(RecordKey, Value)>) -> Result<(), StoreError>;

    /// Writes one record.
    async fn set(&self, key: RecordKey, value: Value) -> Result<(), StoreError> {
        self.set_many(vec![(key, value)]).await
    }
}

// ============================================================================
// Typed Helpers
// ============================================================================

fn decode<T: serde::de::DeserializeOwned>(key: RecordKey, value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Encodes a typed record for [`StateStore::set_many`].
pub fn encode<T: Serialize>(key: RecordKey, value: &T) -> Result<(RecordKey, Value), StoreError> {
    let value = serde_json::to_value(value).map_err(|e| StoreError::Encode {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    Ok((key, value))
}

/// Loads the cumulative usage table; absent reads as empty.
pub async fn load_usage(store: &dyn StateStore) -> Result<UsageTable, StoreError> {
    match store.get(RecordKey::Usage).await? {
        Some(value) => decode(RecordKey::Usage, value),
        None => Ok(UsageTable::new()),
    }
}

pub async fn save_usage(store: &dyn StateStore, usage: &UsageTable) -> Result<(), StoreError> {
    let (key, value) = encode(RecordKey::Usage, usage)?;
    store.set(key, value).await
}

/// Loads settings leniently; a malformed field keeps its default.
pub async fn load_settings(store: &dyn StateStore) -> Result<Settings, StoreError> {
    let stored = store.get(RecordKey::Settings).await?;
    Ok(Settings::from_stored(stored.as_ref()))
}

pub async fn save_settings(store: &dyn StateStore, settings: &Settings) -> Result<(), StoreError> {
    let (key, value) = encode(RecordKey::Settings, settings)?;
    store.set(key, value).await
}

pub async fn load_constraints(store: &dyn StateStore) -> Result<ConstraintSet, StoreError> {
    match store.get(RecordKey::Constraints).await? {
        Some(value) => decode(RecordKey::Constraints, value),
        None => Ok(ConstraintSet::new()),
    }
}

pub async fn save_constraints(
    store: &dyn StateStore,
    constraints: &ConstraintSet,
) -> Result<(), StoreError> {
    let (key, value) = encode(RecordKey::Constraints, constraints)?;
    store.set(key, value).await
}

/// Loads the last-active marker. A malformed marker reads as absent.
pub async fn load_last_active(store: &dyn StateStore) -> Result<Option<LastActive>, StoreError> {
    Ok(store
        .get(RecordKey::LastActive)
        .await?
        .and_then(|value| serde_json::from_value(value).ok()))
}

pub async fn save_last_active(store: &dyn StateStore, marker: &LastActive) -> Result<(), StoreError> {
    let (key, value) = encode(RecordKey::LastActive, marker)?;
    store.set(key, value).await
}
