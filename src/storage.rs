use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::warn;

pub const HISTORY_KEY: &str = "searchHistory";
pub const DAILY_PICK_KEY: &str = "wotd";

/// String-keyed persistence, shaped after browser local storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: String) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug)]
pub enum StorageError {
    Io(io::Error),
    Serialize(serde_json::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Io(err) => write!(f, "storage io error: {err}"),
            StorageError::Serialize(err) => write!(f, "storage encoding error: {err}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<io::Error> for StorageError {
    fn from(value: io::Error) -> Self {
        StorageError::Io(value)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        StorageError::Serialize(value)
    }
}

/// Reads and decodes a JSON value. Missing, unreadable and malformed entries
/// all come back as `None`.
pub fn read_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(err) => {
            warn!(key, error = %err, "failed to read persisted value");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, error = %err, "ignoring malformed persisted value");
            None
        }
    }
}

/// Encodes and writes a JSON value. Failures are logged, never returned.
pub fn write_json<T: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) {
    let encoded = match serde_json::to_string(value) {
        Ok(encoded) => encoded,
        Err(err) => {
            warn!(key, error = %err, "failed to encode persisted value");
            return;
        }
    };
    if let Err(err) = store.set(key, encoded) {
        warn!(key, error = %err, "failed to persist value");
    }
}

pub fn remove_key(store: &dyn KeyValueStore, key: &str) {
    if let Err(err) = store.remove(key) {
        warn!(key, error = %err, "failed to remove persisted value");
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.inner.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.write().remove(key);
        Ok(())
    }
}

/// Keeps every key in one JSON object on disk. The file is read once on open
/// and rewritten in full on each change.
pub struct JsonFileStore {
    path: PathBuf,
    inner: RwLock<BTreeMap<String, String>>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "state file is malformed, starting empty");
                BTreeMap::new()
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read state file, starting empty");
                BTreeMap::new()
            }
        };
        Self {
            path,
            inner: RwLock::new(entries),
        }
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.inner.read().get(key).cloned())
    }

    // A change that fails to reach disk is rolled back, so reads never see
    // a value the next process would not.
    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut guard = self.inner.write();
        let previous = guard.insert(key.to_string(), value);
        self.flush(&guard).inspect_err(|_| match previous {
            Some(previous) => {
                guard.insert(key.to_string(), previous);
            }
            None => {
                guard.remove(key);
            }
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = self.inner.write();
        if let Some(previous) = guard.remove(key) {
            self.flush(&guard).inspect_err(|_| {
                guard.insert(key.to_string(), previous);
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A store that rejects every operation, like a disabled or full browser store.
    pub(crate) struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "storage disabled").into())
        }

        fn set(&self, _key: &str, _value: String) -> Result<(), StorageError> {
            Err(io::Error::other("quota exceeded").into())
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(io::Error::other("quota exceeded").into())
        }
    }

    #[test]
    fn malformed_json_reads_as_absent() {
        let store = MemoryStore::new();
        store.set("k", "{not json".to_string()).unwrap();
        assert_eq!(read_json::<Vec<String>>(&store, "k"), None);
        store.set("k", r#"{"date":"x"}"#.to_string()).unwrap();
        assert_eq!(read_json::<Vec<String>>(&store, "k"), None);
    }

    #[test]
    fn broken_store_degrades_quietly() {
        write_json(&BrokenStore, "k", &vec!["a"]);
        assert_eq!(read_json::<Vec<String>>(&BrokenStore, "k"), None);
        remove_key(&BrokenStore, "k");
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        {
            let store = JsonFileStore::open(&path);
            write_json(&store, HISTORY_KEY, &vec!["gdp", "beta"]);
            write_json(&store, "other", &1);
            store.remove("other").unwrap();
        }
        let reopened = JsonFileStore::open(&path);
        assert_eq!(
            read_json::<Vec<String>>(&reopened, HISTORY_KEY),
            Some(vec!["gdp".to_string(), "beta".to_string()])
        );
        assert_eq!(reopened.get("other").unwrap(), None);
    }

    #[test]
    fn failed_flush_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"not a directory").unwrap();
        let store = JsonFileStore::open(blocker.join("state.json"));
        assert!(store.set(HISTORY_KEY, r#"["gdp"]"#.to_string()).is_err());
        assert_eq!(store.get(HISTORY_KEY).unwrap(), None);
        write_json(&store, HISTORY_KEY, &vec!["gdp"]);
        assert_eq!(read_json::<Vec<String>>(&store, HISTORY_KEY), None);
    }

    #[test]
    fn file_store_ignores_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"[1, 2").unwrap();
        let store = JsonFileStore::open(&path);
        assert_eq!(store.get(HISTORY_KEY).unwrap(), None);
        store.set(HISTORY_KEY, "[]".to_string()).unwrap();
        assert_eq!(JsonFileStore::open(&path).get(HISTORY_KEY).unwrap().as_deref(), Some("[]"));
    }
}
