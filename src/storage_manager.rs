use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::utils::SERVICE;

const VERSION_FIELD: &str = "$version";
const DATA_FIELD: &str = "data";

/// Key-value persistence boundary. Each store persists one namespace under
/// one key; the backing medium is swappable (disk for the app, memory for
/// tests).
pub trait KeyValueStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, String>;
    fn write(&self, key: &str, value: &str) -> Result<(), String>;
    fn remove(&self, key: &str) -> Result<(), String>;
}

/// Disk-backed store: one JSON file per key under the platform data dir.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new() -> Result<Self, String> {
        let base = dirs::data_dir().ok_or_else(|| "No platform data directory".to_string())?;
        Self::with_root(base.join(SERVICE))
    }

    pub fn with_root(root: PathBuf) -> Result<Self, String> {
        fs::create_dir_all(&root).map_err(|e| e.to_string())?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", key))
    }
}

impl KeyValueStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<String>, String> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), String> {
        fs::create_dir_all(&self.root).map_err(|e| e.to_string())?;
        fs::write(self.path_for(key), value).map_err(|e| e.to_string())
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// In-memory store for tests and ephemeral use.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>, String> {
        let map = self.inner.lock().map_err(|_| "Lock poisoned".to_string())?;
        Ok(map.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), String> {
        let mut map = self.inner.lock().map_err(|_| "Lock poisoned".to_string())?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        let mut map = self.inner.lock().map_err(|_| "Lock poisoned".to_string())?;
        map.remove(key);
        Ok(())
    }
}

/// Loads one versioned namespace. Missing data, a version mismatch, or a
/// payload that no longer deserializes all yield `None`; the caller falls
/// back to defaults for that namespace only.
pub fn load_namespace<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
    version: u32,
) -> Result<Option<T>, String> {
    let Some(raw) = store.read(key)? else {
        return Ok(None);
    };

    let envelope: Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(namespace = key, error = %e, "unreadable namespace, resetting");
            return Ok(None);
        }
    };

    let stored_version = envelope.get(VERSION_FIELD).and_then(|v| v.as_u64());
    if stored_version != Some(version as u64) {
        tracing::warn!(
            namespace = key,
            stored = ?stored_version,
            expected = version,
            "namespace version mismatch, resetting"
        );
        return Ok(None);
    }

    let Some(data) = envelope.get(DATA_FIELD) else {
        tracing::warn!(namespace = key, "namespace envelope missing data, resetting");
        return Ok(None);
    };

    match serde_json::from_value(data.clone()) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(e) => {
            tracing::warn!(namespace = key, error = %e, "stale namespace payload, resetting");
            Ok(None)
        }
    }
}

pub fn save_namespace<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    version: u32,
    data: &T,
) -> Result<(), String> {
    let envelope = json!({
        VERSION_FIELD: version,
        DATA_FIELD: data,
    });
    let text = serde_json::to_string(&envelope).map_err(|e| e.to_string())?;
    store.write(key, &text)
}
