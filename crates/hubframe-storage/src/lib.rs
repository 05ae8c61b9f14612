//! Key-value persistence for hubframe adapters.
//!
//! A [`StorageBackend`] maps `(table, key)` to raw bytes; the [`KeyValueStore`]
//! facade layers JSON (de)serialization and a mutex on top so concurrent
//! services never race on the same record.

pub mod backends;
pub mod kv;

use hubframe_core::Result;

pub use backends::memory::MemoryBackend;
pub use backends::redb::{RedbBackend, RedbBackendConfig};
pub use kv::KeyValueStore;

/// Raw byte-oriented storage backend.
pub trait StorageBackend: Send + Sync {
    /// Write a value under `(table, key)`.
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Read the value under `(table, key)`.
    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete `(table, key)`. Returns whether the key existed.
    fn delete(&self, table: &str, key: &str) -> Result<bool>;

    /// List `(key, value)` pairs in `table` whose key starts with `prefix`.
    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Whether data survives a restart.
    fn is_persistent(&self) -> bool;
}
