use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

/// Well-known keys in the flat key-value space.
pub mod keys {
    pub const HISTORY: &str = "history";
    pub const LIBRARY: &str = "library";
    pub const PLAYLISTS: &str = "playlists";
    pub const SETTINGS: &str = "settings";
    /// Legacy single-partition layout, migration source only.
    pub const LEGACY_VIDEOS: &str = "videos";
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(#[from] std::io::Error),
    #[error("failed to encode value for key {key}: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StorageUsage {
    pub used_bytes: u64,
    pub quota_bytes: Option<u64>,
}

impl StorageUsage {
    /// Fraction of quota in use; None when no quota is configured.
    pub fn fraction_used(&self) -> Option<f64> {
        self.quota_bytes
            .filter(|q| *q > 0)
            .map(|q| self.used_bytes as f64 / q as f64)
    }
}

/// The shared, flat, asynchronous key-value store.
///
/// Writes are atomic per key; there are no multi-key transactions and no
/// locking primitive. Every caller does read-modify-write and accepts the
/// documented lost-update window under concurrent writers.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Value>, BackendError>;
    async fn write(&self, key: &str, value: Value) -> Result<(), BackendError>;
    async fn remove(&self, key: &str) -> Result<(), BackendError>;
    async fn usage(&self) -> Result<StorageUsage, BackendError>;
}

/// In-memory backend for tests and ephemeral runs.
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Value>>,
    quota_bytes: Option<u64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: None,
        }
    }

    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn read(&self, key: &str) -> Result<Option<Value>, BackendError> {
        let entries = self.entries.lock().expect("backend lock poisoned");
        Ok(entries.get(key).cloned())
    }

    async fn write(&self, key: &str, value: Value) -> Result<(), BackendError> {
        let mut entries = self.entries.lock().expect("backend lock poisoned");
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        let mut entries = self.entries.lock().expect("backend lock poisoned");
        entries.remove(key);
        Ok(())
    }

    async fn usage(&self) -> Result<StorageUsage, BackendError> {
        let entries = self.entries.lock().expect("backend lock poisoned");
        let used_bytes: u64 = entries
            .values()
            .map(|v| v.to_string().len() as u64)
            .sum();
        Ok(StorageUsage {
            used_bytes,
            quota_bytes: self.quota_bytes,
        })
    }
}

/// File backend: one JSON document per key under a store directory.
///
/// Writes go through a temp file plus rename so a crashed writer never
/// leaves a half-written partition behind.
pub struct JsonFileBackend {
    store_dir: PathBuf,
    quota_bytes: Option<u64>,
}

impl JsonFileBackend {
    pub fn new(store_dir: &Path, quota_bytes: Option<u64>) -> Result<Self, BackendError> {
        std::fs::create_dir_all(store_dir)?;
        Ok(Self {
            store_dir: store_dir.to_path_buf(),
            quota_bytes,
        })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.store_dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl StorageBackend for JsonFileBackend {
    async fn read(&self, key: &str) -> Result<Option<Value>, BackendError> {
        let path = self.key_path(key);
        if !path.exists() {
            debug!("Backend miss: {} (file does not exist)", key);
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path).await?;
        match serde_json::from_str(&content) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                // Unparsable file counts as corruption, not unavailability.
                // Report the key as absent so the caller reinitializes it.
                warn!(
                    "Backend corruption for key {}: {}. Treating as absent.",
                    key, e
                );
                Ok(None)
            }
        }
    }

    async fn write(&self, key: &str, value: Value) -> Result<(), BackendError> {
        let path = self.key_path(key);
        let content = serde_json::to_string(&value).map_err(|source| BackendError::Encode {
            key: key.to_string(),
            source,
        })?;

        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, content).await?;
        tokio::fs::rename(&temp_path, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        let path = self.key_path(key);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn usage(&self) -> Result<StorageUsage, BackendError> {
        let mut used_bytes = 0u64;
        let mut entries = tokio::fs::read_dir(&self.store_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                used_bytes += entry.metadata().await?.len();
            }
        }
        Ok(StorageUsage {
            used_bytes,
            quota_bytes: self.quota_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_backend_round_trip() {
        let backend = MemoryBackend::new();
        assert!(backend.read("history").await.unwrap().is_none());

        backend.write("history", json!({"a": 1})).await.unwrap();
        assert_eq!(backend.read("history").await.unwrap(), Some(json!({"a": 1})));

        backend.remove("history").await.unwrap();
        assert!(backend.read("history").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileBackend::new(dir.path(), None).unwrap();

        backend.write("playlists", json!({"faves": ["a"]})).await.unwrap();
        let value = backend.read("playlists").await.unwrap();
        assert_eq!(value, Some(json!({"faves": ["a"]})));

        backend.remove("playlists").await.unwrap();
        assert!(backend.read("playlists").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_backend_corrupt_file_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileBackend::new(dir.path(), None).unwrap();
        std::fs::write(dir.path().join("history.json"), "{not json").unwrap();

        assert!(backend.read("history").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_usage_counts_json_files_against_quota() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileBackend::new(dir.path(), Some(1_000)).unwrap();
        backend.write("history", json!({"k": "v"})).await.unwrap();

        let usage = backend.usage().await.unwrap();
        assert!(usage.used_bytes > 0);
        assert_eq!(usage.quota_bytes, Some(1_000));
        assert!(usage.fraction_used().unwrap() < 1.0);
    }
}
