//! Key-value persistence surface
//!
//! Intents, the ledger and alert bookkeeping are stored as JSON strings under
//! fixed keys. Any store exposing `get`/`set` on strings can back them.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Generic string key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` when the key was never written
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Write `value` only if the stored value still equals `expected`
    ///
    /// `expected == None` means the key must be absent. Returns `false` and
    /// leaves storage untouched when another writer got there first.
    async fn set_if(&self, key: &str, expected: Option<&str>, value: String) -> Result<bool>;
}

/// In-process store, used by tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn set_if(&self, key: &str, expected: Option<&str>, value: String) -> Result<bool> {
        let mut entries = self.entries.write().await;
        if entries.get(key).map(String::as_str) != expected {
            return Ok(false);
        }
        entries.insert(key.to_string(), value);
        Ok(true)
    }
}

/// Single JSON file holding a `{key: value}` object
///
/// Writes go to a sibling temp file and are renamed into place.
pub struct JsonFileKv {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileKv {
    /// Create a store backed by `path` (created on first write)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<HashMap<String, String>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(Error::Storage(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        match serde_json::from_str(&content) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(
                    "State file {} is unreadable ({}), starting from empty state",
                    self.path.display(),
                    e
                );
                Ok(HashMap::new())
            }
        }
    }

    /// Replace the file contents; caller holds `write_lock`
    async fn write_all(&self, key: &str, entries: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            Error::Storage(format!("Failed to replace {}: {}", self.path.display(), e))
        })?;

        debug!("Persisted key {} to {}", key, self.path.display());
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut entries = self.read_all().await?;
        entries.insert(key.to_string(), value);
        self.write_all(key, &entries).await
    }

    async fn set_if(&self, key: &str, expected: Option<&str>, value: String) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let mut entries = self.read_all().await?;
        if entries.get(key).map(String::as_str) != expected {
            debug!("Conditional write to {} lost, stored value changed", key);
            return Ok(false);
        }
        entries.insert(key.to_string(), value);
        self.write_all(key, &entries).await?;
        Ok(true)
    }
}
