//! Typed key-value facade.
//!
//! Serialises every access through one mutex so read-modify-write sequences
//! from concurrent services do not interleave on the same record.

use crate::StorageBackend;
use hubframe_core::{Error, Result};
use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;

/// JSON record store over a [`StorageBackend`].
#[derive(Clone)]
pub struct KeyValueStore {
    backend: Arc<dyn StorageBackend>,
    lock: Arc<Mutex<()>>,
}

impl KeyValueStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Store `value` as JSON under `(table, key)`.
    pub fn set<T: Serialize>(&self, table: &str, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        let _guard = self.lock.lock();
        self.backend.write(table, key, &bytes)
    }

    /// Load the JSON record under `(table, key)`.
    pub fn get<T: DeserializeOwned>(&self, table: &str, key: &str) -> Result<Option<T>> {
        let bytes = {
            let _guard = self.lock.lock();
            self.backend.read(table, key)?
        };
        match bytes {
            None => Ok(None),
            Some(b) => serde_json::from_slice(&b)
                .map(Some)
                .map_err(|e| Error::Storage(format!("corrupt record {table}/{key}: {e}"))),
        }
    }

    /// Remove `(table, key)`. Returns whether it existed.
    pub fn delete(&self, table: &str, key: &str) -> Result<bool> {
        let _guard = self.lock.lock();
        self.backend.delete(table, key)
    }

    /// All records in `table`, decoded.
    pub fn list<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<(String, T)>> {
        let rows = {
            let _guard = self.lock.lock();
            self.backend.scan(table, "")?
        };
        rows.into_iter()
            .map(|(k, v)| {
                serde_json::from_slice(&v)
                    .map(|t| (k.clone(), t))
                    .map_err(|e| Error::Storage(format!("corrupt record {table}/{k}: {e}")))
            })
            .collect()
    }

    /// Run a read-modify-write atomically with respect to other facade
    /// callers.
    pub fn update<T, F>(&self, table: &str, key: &str, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T),
    {
        let _guard = self.lock.lock();
        let mut value: T = match self.backend.read(table, key)? {
            Some(b) => serde_json::from_slice(&b)
                .map_err(|e| Error::Storage(format!("corrupt record {table}/{key}: {e}")))?,
            None => T::default(),
        };
        f(&mut value);
        self.backend.write(table, key, &serde_json::to_vec(&value)?)?;
        Ok(value)
    }
}
