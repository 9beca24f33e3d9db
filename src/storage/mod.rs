//! Durable client storage
//!
//! A small string key/value seam standing in for browser local storage.
//! The quota record and the anonymous identity token are the only values
//! written through it.

use crate::error::{EstimateError, Result};
use directories::ProjectDirs;
use sled::Db;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// String key/value storage
///
/// Implementations must be cheap to call from the UI thread; every write
/// is expected to be durable when it returns.
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` if the key was never written
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Embedded `sled` store
pub struct SledStore {
    db: Db,
}

impl SledStore {
    /// Open or create a store at `path`
    ///
    /// # Errors
    ///
    /// Returns `EstimateError::Storage` if the database cannot be opened
    ///
    /// # Examples
    ///
    /// ```
    /// use estimate_chat::storage::{KeyValueStore, SledStore};
    ///
    /// # fn main() -> estimate_chat::error::Result<()> {
    /// let dir = tempfile::TempDir::new()?;
    /// let store = SledStore::open(dir.path().join("client.db"))?;
    /// store.set("greeting", "hello")?;
    /// assert_eq!(store.get("greeting")?.as_deref(), Some("hello"));
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| EstimateError::Storage(format!("Failed to open database: {}", e)))?;
        Ok(Self { db })
    }

    /// Open the store at `path`, or in the user's data directory when
    /// `path` is `None`
    pub fn open_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::open(path),
            None => Self::open(default_storage_path()?),
        }
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .db
            .get(key.as_bytes())
            .map_err(|e| EstimateError::Storage(format!("Get failed: {}", e)))?;

        match value {
            Some(bytes) => {
                let text = String::from_utf8(bytes.to_vec())
                    .map_err(|e| EstimateError::Storage(format!("Value is not UTF-8: {}", e)))?;
                Ok(Some(text))
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.db
            .insert(key.as_bytes(), value.as_bytes())
            .map_err(|e| EstimateError::Storage(format!("Insert failed: {}", e)))?;

        self.db
            .flush()
            .map_err(|e| EstimateError::Storage(format!("Flush failed: {}", e)))?;

        Ok(())
    }
}

/// Process-local store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|_| EstimateError::Storage("Memory store lock poisoned".to_string()))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| EstimateError::Storage("Memory store lock poisoned".to_string()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Default on-disk location: `<data dir>/client.db`
pub fn default_storage_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "estimate", "estimate-chat")
        .ok_or_else(|| EstimateError::Storage("Could not determine data directory".into()))?;

    let data_dir = proj_dirs.data_dir();
    std::fs::create_dir_all(data_dir)
        .map_err(|e| EstimateError::Storage(format!("Failed to create data directory: {}", e)))?;

    Ok(data_dir.join("client.db"))
}
