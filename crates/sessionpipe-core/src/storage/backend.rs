//! Storage areas that hold sealed session records.
//!
//! A backend is a flat string-to-string map. `MemoryStorage` lives for the
//! lifetime of the process (the equivalent of per-tab storage), while
//! `FileStorage` keeps a single JSON file so a session survives restarts.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage quota exceeded: {needed} bytes needed, limit is {limit} bytes")]
    QuotaExceeded { needed: usize, limit: usize },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize storage contents: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A flat key/value storage area.
///
/// Implementations lock internally for the duration of a single call only;
/// callers never hold a backend lock across an await point.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// All keys currently present, in no particular order.
    fn keys(&self) -> Vec<String>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding the lock cannot leave a map half-written
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// In-memory storage
// ============================================================================

/// Process-local storage area with an optional byte quota.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes once keys plus values would exceed `limit` bytes.
    pub fn with_quota(limit: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(limit),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StorageBackend for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = lock(&self.entries);

        if let Some(limit) = self.quota_bytes {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > limit {
                return Err(StorageError::QuotaExceeded { needed, limit });
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        lock(&self.entries).remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        lock(&self.entries).keys().cloned().collect()
    }
}

// ============================================================================
// File storage
// ============================================================================

/// Storage area persisted as one JSON object on disk.
///
/// The file is read once on open and rewritten after every mutation. Two
/// processes sharing the same file will overwrite each other's changes.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open (or lazily create) the storage file at `path`.
    ///
    /// An unreadable or unparseable file is treated as empty rather than
    /// failing, since its contents are only a session cache.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring corrupt storage file");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read storage file");
                BTreeMap::new()
            }
        };

        debug!(path = %path.display(), entries = entries.len(), "Opened file storage");
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl StorageBackend for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = lock(&self.entries);
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.flush(&entries) {
            // Keep memory and disk in agreement when the write fails
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = lock(&self.entries);
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        lock(&self.entries).keys().cloned().collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_storage_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("sessionpipe-test-{}-{}", std::process::id(), name))
            .join("store.json")
    }

    #[test]
    fn test_memory_storage_set_get_remove() {
        let storage = MemoryStorage::new();
        assert!(storage.is_empty());

        storage.set("a", "1").expect("write should succeed");
        assert_eq!(storage.get("a").as_deref(), Some("1"));
        assert_eq!(storage.len(), 1);

        storage.remove("a").expect("remove should succeed");
        assert_eq!(storage.get("a"), None);
    }

    #[test]
    fn test_memory_storage_quota() {
        let storage = MemoryStorage::with_quota(10);
        storage.set("k", "12345").expect("within quota");

        let err = storage.set("other", "123456789").unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { limit: 10, .. }));
        assert_eq!(storage.get("other"), None);

        // Overwriting an existing key only counts the new value
        storage.set("k", "123456789").expect("replacement within quota");
    }

    #[test]
    fn test_file_storage_persists_across_instances() {
        let path = temp_storage_path("persist");
        let _ = std::fs::remove_file(&path);

        let storage = FileStorage::open(&path);
        storage.set("token", "sealed").expect("write should succeed");
        drop(storage);

        let reopened = FileStorage::open(&path);
        assert_eq!(reopened.get("token").as_deref(), Some("sealed"));

        reopened.remove("token").expect("remove should succeed");
        let reopened = FileStorage::open(&path);
        assert_eq!(reopened.get("token"), None);

        let _ = std::fs::remove_dir_all(path.parent().expect("temp path has a parent"));
    }

    #[test]
    fn test_file_storage_corrupt_file_is_empty() {
        let path = temp_storage_path("corrupt");
        std::fs::create_dir_all(path.parent().expect("temp path has a parent"))
            .expect("create temp dir");
        std::fs::write(&path, "{not json").expect("write corrupt file");

        let storage = FileStorage::open(&path);
        assert!(storage.keys().is_empty());

        let _ = std::fs::remove_dir_all(path.parent().expect("temp path has a parent"));
    }
}
