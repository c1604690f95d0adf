//! String-keyed durable storage backends.
//!
//! `KeyValueStorage` is the browser-storage-shaped seam the credential store
//! is built on. Removing a key that is not present is never an error.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use keyring::Entry;
use tracing::{debug, warn};

pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Write several entries as one unit where the backend can.
    ///
    /// The fallback writes them in order and stops at the first failure.
    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()>;

    fn clear(&self) -> Result<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local storage. Backs the transient session-scoped store and tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut map = lock(&self.entries);
        for (key, value) in entries {
            map.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        lock(&self.entries).clear();
        Ok(())
    }
}

// ============================================================================
// JSON file
// ============================================================================

/// Storage file name in the storage directory
const STORAGE_FILE: &str = "storage.json";

/// All entries in one JSON object on disk.
///
/// Every mutation rewrites the whole file through a temp file and rename, so a
/// reader never sees a half-written map. A file that no longer parses is moved
/// aside to `storage.json.corrupt` and the store starts over empty.
pub struct FileStorage {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileStorage {
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create storage directory {}", dir.display()))?;
        Ok(Self {
            path: dir.join(STORAGE_FILE),
            guard: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path).context("Failed to read storage file")?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        match serde_json::from_str(&contents) {
            Ok(map) => Ok(map),
            Err(e) => {
                let aside = self.path.with_extension("json.corrupt");
                warn!(error = %e, moved_to = %aside.display(), "Unreadable storage file, starting empty");
                if let Err(e) = std::fs::rename(&self.path, &aside) {
                    warn!(error = %e, "Failed to move unreadable storage file aside");
                }
                Ok(BTreeMap::new())
            }
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(map)?;
        std::fs::write(&tmp, contents).context("Failed to write storage file")?;
        std::fs::rename(&tmp, &self.path).context("Failed to replace storage file")?;
        Ok(())
    }

    fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let _guard = lock(&self.guard);
        let mut map = self.read_map()?;
        if f(&mut map) {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = lock(&self.guard);
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|map| {
            map.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        self.update(|map| {
            for (key, value) in entries {
                map.insert(key.to_string(), value.to_string());
            }
            true
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|map| map.remove(key).is_some())
    }

    fn clear(&self) -> Result<()> {
        let _guard = lock(&self.guard);
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("Failed to remove storage file")?;
        }
        Ok(())
    }
}

// ============================================================================
// OS keyring
// ============================================================================

const SERVICE_NAME: &str = "rolechat";

/// One keyring entry per key.
///
/// The keyring cannot enumerate entries, so `clear` removes the keys this
/// store was told about plus any it has written.
pub struct KeyringStorage {
    service: String,
    known_keys: Mutex<BTreeSet<String>>,
}

impl KeyringStorage {
    pub fn new<I, S>(known_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            service: SERVICE_NAME.to_string(),
            known_keys: Mutex::new(known_keys.into_iter().map(Into::into).collect()),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).context("Failed to create keyring entry")
    }
}

impl KeyValueStorage for KeyringStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to read from keychain"),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .context("Failed to store value in keychain")?;
        lock(&self.known_keys).insert(key.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }

    fn clear(&self) -> Result<()> {
        let keys: Vec<String> = lock(&self.known_keys).iter().cloned().collect();
        for key in keys {
            debug!(key = %key, "Clearing keychain entry");
            self.remove(&key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_remove_absent_is_ok() {
        let storage = MemoryStorage::new();
        assert!(storage.remove("missing").is_ok());
        storage.set("a", "1").unwrap();
        assert_eq!(storage.get("a").unwrap().as_deref(), Some("1"));
        storage.clear().unwrap();
        assert_eq!(storage.get("a").unwrap(), None);
    }

    #[test]
    fn test_file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = FileStorage::new(dir.path()).unwrap();
            storage.set("access_token", "tok").unwrap();
            storage.set("token_expiry", "1700000000000").unwrap();
        }

        let reopened = FileStorage::new(dir.path()).unwrap();
        assert_eq!(reopened.get("access_token").unwrap().as_deref(), Some("tok"));
        assert_eq!(reopened.get("token_expiry").unwrap().as_deref(), Some("1700000000000"));
        assert_eq!(reopened.get("user_info").unwrap(), None);
    }

    #[test]
    fn test_file_storage_remove_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        // Nothing on disk yet
        assert!(storage.remove("access_token").is_ok());
        assert!(storage.clear().is_ok());

        storage.set("a", "1").unwrap();
        storage.set("b", "2").unwrap();
        storage.remove("a").unwrap();
        assert_eq!(storage.get("a").unwrap(), None);
        assert_eq!(storage.get("b").unwrap().as_deref(), Some("2"));

        storage.clear().unwrap();
        assert!(!storage.path().exists());
        assert_eq!(storage.get("b").unwrap(), None);
    }

    #[test]
    fn test_file_storage_set_many_is_one_write() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        storage
            .set_many(&[("token_expiry", "1700000000000"), ("access_token", "tok")])
            .unwrap();

        let on_disk: BTreeMap<String, String> =
            serde_json::from_str(&std::fs::read_to_string(storage.path()).unwrap()).unwrap();
        assert_eq!(on_disk.len(), 2);
        assert_eq!(on_disk["access_token"], "tok");
        assert!(!storage.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_file_storage_recovers_from_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        std::fs::write(storage.path(), "{not json").unwrap();

        assert_eq!(storage.get("a").unwrap(), None);
        let aside = storage.path().with_extension("json.corrupt");
        assert_eq!(std::fs::read_to_string(&aside).unwrap(), "{not json");

        storage.set("access_token", "fresh").unwrap();
        assert_eq!(storage.get("access_token").unwrap().as_deref(), Some("fresh"));
        let reopened = FileStorage::new(dir.path()).unwrap();
        assert_eq!(reopened.get("access_token").unwrap().as_deref(), Some("fresh"));
    }

    #[test]
    fn test_file_storage_overwrites_corrupt_file_on_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        std::fs::write(storage.path(), "{trunc").unwrap();

        storage.set("a", "1").unwrap();
        let contents = std::fs::read_to_string(storage.path()).unwrap();
        let map: BTreeMap<String, String> = serde_json::from_str(&contents).unwrap();
        assert_eq!(map.get("a").map(String::as_str), Some("1"));
    }
}
