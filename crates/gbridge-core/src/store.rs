//! Shared persistent key/value store with change notifications.
//!
//! [`LocalStore`] is the storage every context observes. Values are JSON,
//! mutations are strictly ordered, and every mutation that actually changes
//! a key's presence or value is published to subscribers as a
//! [`StorageChange`]. Writing a value equal to the current one publishes
//! nothing.
//!
//! A store may be backed by a JSON file. The file is rewritten with a
//! temp-file-then-rename on every mutation so a crash never leaves a
//! half-written store behind.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info};

/// How many unread change events a slow subscriber may lag behind.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Errors raised by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode store contents: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("value under '{key}' has unexpected shape: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One observed transition of a key.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

struct Inner {
    path: Option<PathBuf>,
    data: Mutex<BTreeMap<String, Value>>,
    changes: broadcast::Sender<StorageChange>,
}

/// Handle to the shared store. Cloning shares the same underlying state.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("path", &self.inner.path)
            .finish_non_exhaustive()
    }
}

impl LocalStore {
    /// A store that lives only in memory.
    pub fn in_memory() -> Self {
        Self::with_data(None, BTreeMap::new())
    }

    /// Opens (or creates on first write) a store backed by `path`.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let data = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            let data: BTreeMap<String, Value> = serde_json::from_str(&content)?;
            info!(path = %path.display(), keys = data.len(), "loaded store");
            data
        } else {
            debug!(path = %path.display(), "no store file yet");
            BTreeMap::new()
        };
        Ok(Self::with_data(Some(path), data))
    }

    fn with_data(path: Option<PathBuf>, data: BTreeMap<String, Value>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                path,
                data: Mutex::new(data),
                changes,
            }),
        }
    }

    /// The backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Subscribes to change events. Only changes made after this call are
    /// delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.inner.changes.subscribe()
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.inner.data.lock().await.get(key).cloned()
    }

    /// Reads and decodes the value under `key`.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get(key).await {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| StoreError::Decode {
                    key: key.to_string(),
                    source,
                }),
        }
    }

    /// Stores `value` under `key`.
    pub async fn set(&self, key: impl Into<String>, value: impl Serialize) -> StoreResult<()> {
        let value = serde_json::to_value(value)?;
        self.set_many(vec![(key.into(), value)]).await
    }

    /// Stores several values as one batch: either all of them reach the
    /// backing file or none do. Change events are published in batch order.
    pub async fn set_many(&self, entries: Vec<(String, Value)>) -> StoreResult<()> {
        let mut data = self.inner.data.lock().await;
        let mut next = data.clone();
        let mut changes = Vec::new();

        for (key, value) in entries {
            let old_value = next.insert(key.clone(), value.clone());
            if old_value.as_ref() != Some(&value) {
                changes.push(StorageChange {
                    key,
                    old_value,
                    new_value: Some(value),
                });
            }
        }

        if changes.is_empty() {
            return Ok(());
        }

        self.persist(&next)?;
        *data = next;
        for change in changes {
            let _ = self.inner.changes.send(change);
        }
        Ok(())
    }

    /// Removes `key`. Removing an absent key publishes nothing.
    pub async fn remove(&self, key: &str) -> StoreResult<()> {
        let mut data = self.inner.data.lock().await;
        if !data.contains_key(key) {
            return Ok(());
        }

        let mut next = data.clone();
        let old_value = next.remove(key);
        self.persist(&next)?;
        *data = next;
        let _ = self.inner.changes.send(StorageChange {
            key: key.to_string(),
            old_value,
            new_value: None,
        });
        Ok(())
    }

    fn persist(&self, data: &BTreeMap<String, Value>) -> StoreResult<()> {
        let Some(path) = &self.inner.path else {
            return Ok(());
        };
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let temp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(data)?;
        fs::write(&temp_path, content).map_err(io_err)?;
        fs::rename(&temp_path, path).map_err(io_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
        }

        Ok(())
    }
}
