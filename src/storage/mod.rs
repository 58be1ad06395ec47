//! Durable key-value storage.
//!
//! Every persistent piece of state (criteria, saved items, surface
//! timestamps) lives in a [`KeyValueStore`] under its own namespace. Values
//! are JSON-encoded primitives, strings, or sets.

pub mod schema;
pub mod sqlite;
pub mod write_behind;

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{PhrasecastError, Result};

pub use sqlite::SqliteStore;
pub use write_behind::WriteBehind;

/// Namespace for user selection criteria.
pub const NS_CRITERIA: &str = "criteria";

/// Namespace for the saved-item ledger.
pub const NS_SAVED: &str = "saved";

/// Namespace for surface cadence and timestamps.
pub const NS_SURFACES: &str = "surfaces";

/// Byte-oriented key-value store with per-namespace keys.
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` when absent.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite a value.
    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Delete a value. Deleting a missing key is not an error.
    fn remove(&self, namespace: &str, key: &str) -> Result<()>;
}

/// Read and decode a JSON value.
pub fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    namespace: &str,
    key: &str,
) -> Result<Option<T>> {
    let Some(bytes) = store.get(namespace, key)? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| PhrasecastError::Storage(format!("cannot decode {namespace}/{key}: {e}")))
}

/// Encode a value as JSON bytes.
pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| PhrasecastError::Storage(format!("cannot encode: {e}")))
}

/// Encode and write a JSON value.
pub fn put_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    namespace: &str,
    key: &str,
    value: &T,
) -> Result<()> {
    let bytes = encode_json(value)?;
    store.put(namespace, key, &bytes)
}

/// In-memory store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries across all namespaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Returns `true` when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .get(&(namespace.to_owned(), key.to_owned()))
            .cloned())
    }

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert((namespace.to_owned(), key.to_owned()), value.to_vec());
        Ok(())
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(&(namespace.to_owned(), key.to_owned()));
        Ok(())
    }
}
