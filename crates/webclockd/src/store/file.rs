//! Single-file JSON store.
//!
//! All records live in one JSON object on disk. Writes go to a sibling
//! temporary file which is then renamed over the original, so a crash
//! mid-write leaves either the old or the new contents.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;

use super::{RecordKey, StateStore, StoreError};

/// A [`StateStore`] backed by one JSON file.
pub struct JsonFileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Map<String, Value>, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(StoreError::io(e)),
        };

        if contents.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StoreError::Corrupt {
                key: self.path.display().to_string(),
                reason: "top level is not an object".to_string(),
            }),
            Err(e) => Err(StoreError::Corrupt {
                key: self.path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn write_all(&self, map: Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(StoreError::io)?;
            }
        }

        let json = serde_json::to_vec_pretty(&Value::Object(map)).map_err(|e| StoreError::Encode {
            key: self.path.display().to_string(),
            reason: e.to_string(),
        })?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await.map_err(StoreError::io)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(StoreError::io)?;

        debug!(path = %self.path.display(), bytes = json.len(), "State file written");
        Ok(())
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn get(&self, key: RecordKey) -> Result<Option<Value>, StoreError> {
        let mut map = self.read_all().await?;
        Ok(map.remove(key.as_str()))
    }

    async fn set_many(&self, records: Vec<(RecordKey, Value)>) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_all().await?;
        for (key, value) in records {
            map.insert(key.as_str().to_string(), value);
        }
        self.write_all(map).await
    }
}
