use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::KeyValueStore;
use crate::error::StorageError;

/// One JSON file per key under a base directory.
///
/// Writes go to a temporary file first and are renamed into place, so a
/// crash mid-write never leaves a truncated document behind.
pub struct FileStore {
    base_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Create a new store with the default base directory ("./wallet-data")
    pub fn new() -> Self {
        Self::new_with_base_dir(PathBuf::from("./wallet-data"))
    }

    /// Create a store with custom base directory (for testing)
    pub fn new_with_base_dir(base_path: PathBuf) -> Self {
        Self {
            base_path,
            write_lock: Mutex::new(()),
        }
    }

    /// Get the base directory path
    pub fn base_dir(&self) -> &Path {
        &self.base_path
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(StorageError::Backend(format!("invalid storage key '{}'", key)));
        }
        Ok(self.base_path.join(format!("{}.json", key)))
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StorageError> {
        let mut values = HashMap::new();
        for key in keys {
            let path = self.key_path(key)?;
            if !path.exists() {
                continue;
            }
            let contents = fs::read_to_string(&path)?;
            values.insert(key.to_string(), serde_json::from_str(&contents)?);
        }
        Ok(values)
    }

    fn set(&self, entries: HashMap<String, Value>) -> Result<(), StorageError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::Backend("file store lock poisoned".into()))?;
        fs::create_dir_all(&self.base_path)?;
        for (key, value) in entries {
            let path = self.key_path(&key)?;
            let tmp = path.with_extension("json.tmp");
            fs::write(&tmp, serde_json::to_string_pretty(&value)?)?;
            fs::rename(&tmp, &path)?;
        }
        Ok(())
    }

    fn remove(&self, keys: &[&str]) -> Result<(), StorageError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::Backend("file store lock poisoned".into()))?;
        for key in keys {
            let path = self.key_path(key)?;
            if path.exists() {
                log::debug!("Removing stored key {}", key);
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new_with_base_dir(temp_dir.path().join("data"));

        store
            .set(HashMap::from([(
                "lastActiveTime".to_string(),
                json!(1_700_000_000_000i64),
            )]))
            .unwrap();

        let values = store.get(&["lastActiveTime", "missing"]).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values["lastActiveTime"], json!(1_700_000_000_000i64));
        assert!(temp_dir.path().join("data/lastActiveTime.json").exists());

        store.remove(&["lastActiveTime", "missing"]).unwrap();
        assert!(store.get(&["lastActiveTime"]).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new_with_base_dir(temp_dir.path().to_path_buf());
        assert!(store.get(&["../escape"]).is_err());
    }
}
