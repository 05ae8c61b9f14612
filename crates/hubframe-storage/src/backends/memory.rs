//! In-memory storage backend, used by tests and throwaway adapters.

use crate::StorageBackend;
use hubframe_core::Result;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Non-persistent backend over a BTreeMap.
#[derive(Default)]
pub struct MemoryBackend {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn make_key(table: &str, key: &str) -> String {
    format!("{table}:{key}")
}

impl StorageBackend for MemoryBackend {
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        self.data
            .write()
            .insert(make_key(table, key), value.to_vec());
        Ok(())
    }

    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(&make_key(table, key)).cloned())
    }

    fn delete(&self, table: &str, key: &str) -> Result<bool> {
        Ok(self.data.write().remove(&make_key(table, key)).is_some())
    }

    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let namespaced = make_key(table, prefix);
        let table_prefix = format!("{table}:");
        Ok(self
            .data
            .read()
            .range(namespaced.clone()..)
            .take_while(|(k, _)| k.starts_with(&namespaced))
            .map(|(k, v)| (k[table_prefix.len()..].to_string(), v.clone()))
            .collect())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}
