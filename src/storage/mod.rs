//! Storage and persistence layer
//!
//! - Key-value port supplied by the host
//! - In-memory and file-system backends
//! - Typed helpers for JSON documents

mod file_system;
mod memory;

pub use file_system::FileStore;
pub use memory::MemoryStore;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{StorageError, WalletError};

/// Well-known keys used by the wallet components
pub mod keys {
    pub const ENCRYPTED_KEYS: &str = "encryptedKeys";
    pub const LAST_ACTIVE_TIME: &str = "lastActiveTime";
    pub const TRACKED_UTXOS: &str = "trackedUtxos";
    pub const DERIVATION_TAGS: &str = "derivationTags";
    pub const WHITELIST: &str = "whitelist";
}

/// Persistent key-value store provided by the host.
///
/// `get` returns only the keys that exist; missing keys are simply absent
/// from the returned map.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StorageError>;
    fn set(&self, entries: HashMap<String, Value>) -> Result<(), StorageError>;
    fn remove(&self, keys: &[&str]) -> Result<(), StorageError>;
}

/// Load and deserialize a single document.
pub fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    let mut values = store.get(&[key])?;
    match values.remove(key) {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serialize and store a single document.
pub fn save_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let mut entries = HashMap::new();
    entries.insert(key.to_string(), serde_json::to_value(value)?);
    store.set(entries)
}

/// Load a document that the wallet cannot operate without.
///
/// A document that exists but doesn't parse is reported as `Corrupted`.
pub fn load_required<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, WalletError> {
    load_json(store, key).map_err(|e| match e {
        StorageError::Json(e) => WalletError::Corrupted(format!("{}: {}", key, e)),
        other => WalletError::Storage(other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_malformed_document_is_corrupted() {
        let store = MemoryStore::new();
        store
            .set(HashMap::from([(keys::LAST_ACTIVE_TIME.to_string(), json!("yesterday"))]))
            .unwrap();

        let result: Result<Option<i64>, _> = load_required(&store, keys::LAST_ACTIVE_TIME);
        assert!(matches!(result, Err(WalletError::Corrupted(_))));

        let missing: Option<i64> = load_required(&store, keys::WHITELIST).unwrap();
        assert!(missing.is_none());
    }
}
