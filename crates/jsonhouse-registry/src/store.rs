//! JSON key-value stores for persisted engine state

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON in store: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid store key: {0}")]
    InvalidKey(String),
}

pub trait JsonStore: Send + Sync {
    fn put(&self, key: &str, value: &Value) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// All entries, ordered by key.
    fn list(&self) -> Result<Vec<(String, Value)>, StoreError>;
}

/// In-process store, used by tests and dry runs.
#[derive(Default)]
pub struct MemoryJsonStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryJsonStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JsonStore for MemoryJsonStore {
    fn put(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), value.clone());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn list(&self) -> Result<Vec<(String, Value)>, StoreError> {
        Ok(self
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// One `<key>.json` file per entry in a directory.
pub struct FileJsonStore {
    directory: PathBuf,
}

impl FileJsonStore {
    pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self, StoreError> {
        std::fs::create_dir_all(directory.as_ref())?;
        Ok(Self {
            directory: directory.as_ref().to_path_buf(),
        })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let invalid = key.is_empty()
            || key.starts_with('.')
            || key.contains(|c: char| matches!(c, '/' | '\\' | '\0'));
        if invalid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.directory.join(format!("{}.json", key)))
    }
}

impl JsonStore for FileJsonStore {
    fn put(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        // write-then-rename so readers never see a partial file
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<(String, Value)>, StoreError> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let bytes = std::fs::read(&path)?;
            entries.push((key.to_string(), serde_json::from_slice(&bytes)?));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}
