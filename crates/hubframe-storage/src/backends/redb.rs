//! redb-backed persistent storage.
//!
//! All tables share one unified redb table; keys are namespaced as
//! `"<table>:<key>"`.

use crate::StorageBackend;
use hubframe_core::{Error, Result};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

const UNIFIED_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("hubframe_storage");

fn make_key(table: &str, key: &str) -> String {
    let mut out = String::with_capacity(table.len() + key.len() + 1);
    out.push_str(table);
    out.push(':');
    out.push_str(key);
    out
}

/// Configuration for [`RedbBackend`].
#[derive(Debug, Clone)]
pub struct RedbBackendConfig {
    /// Path to the database file.
    pub path: String,
    /// Create parent directories when missing.
    pub create_dirs: bool,
}

impl RedbBackendConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            create_dirs: true,
        }
    }
}

/// Persistent backend over a single redb database file.
pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    /// Open (or create) the database at the configured path.
    pub fn new(config: RedbBackendConfig) -> Result<Self> {
        let path = Path::new(&config.path);
        if config.create_dirs {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Storage(format!("create storage dir: {e}")))?;
            }
        }
        let db = if path.exists() {
            Database::open(path).map_err(|e| Error::Storage(e.to_string()))?
        } else {
            Database::create(path).map_err(|e| Error::Storage(e.to_string()))?
        };
        // Make sure the unified table exists so first reads do not fail.
        let txn = db
            .begin_write()
            .map_err(|e| Error::Storage(e.to_string()))?;
        {
            txn.open_table(UNIFIED_TABLE)
                .map_err(|e| Error::Storage(e.to_string()))?;
        }
        txn.commit().map_err(|e| Error::Storage(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl StorageBackend for RedbBackend {
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| Error::Storage(e.to_string()))?;
        {
            let mut t = txn
                .open_table(UNIFIED_TABLE)
                .map_err(|e| Error::Storage(e.to_string()))?;
            t.insert(make_key(table, key).as_str(), value)
                .map_err(|e| Error::Storage(e.to_string()))?;
        }
        txn.commit().map_err(|e| Error::Storage(e.to_string()))
    }

    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| Error::Storage(e.to_string()))?;
        let t = txn
            .open_table(UNIFIED_TABLE)
            .map_err(|e| Error::Storage(e.to_string()))?;
        let value = t
            .get(make_key(table, key).as_str())
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn delete(&self, table: &str, key: &str) -> Result<bool> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| Error::Storage(e.to_string()))?;
        let existed;
        {
            let mut t = txn
                .open_table(UNIFIED_TABLE)
                .map_err(|e| Error::Storage(e.to_string()))?;
            existed = t
                .remove(make_key(table, key).as_str())
                .map_err(|e| Error::Storage(e.to_string()))?
                .is_some();
        }
        txn.commit().map_err(|e| Error::Storage(e.to_string()))?;
        Ok(existed)
    }

    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let namespaced = make_key(table, prefix);
        let table_prefix = format!("{table}:");
        let txn = self
            .db
            .begin_read()
            .map_err(|e| Error::Storage(e.to_string()))?;
        let t = txn
            .open_table(UNIFIED_TABLE)
            .map_err(|e| Error::Storage(e.to_string()))?;
        let mut out = Vec::new();
        for item in t
            .range(namespaced.as_str()..)
            .map_err(|e| Error::Storage(e.to_string()))?
        {
            let (k, v) = item.map_err(|e| Error::Storage(e.to_string()))?;
            let k = k.value();
            if !k.starts_with(&namespaced) {
                break;
            }
            out.push((k[table_prefix.len()..].to_string(), v.value().to_vec()));
        }
        Ok(out)
    }

    fn is_persistent(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, RedbBackend) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.redb");
        let backend =
            RedbBackend::new(RedbBackendConfig::new(path.to_string_lossy().to_string())).unwrap();
        (dir, backend)
    }

    #[test]
    fn test_write_read_delete() {
        let (_dir, backend) = open_temp();
        backend.write("device", "7", b"{\"level\":1}").unwrap();
        assert_eq!(
            backend.read("device", "7").unwrap(),
            Some(b"{\"level\":1}".to_vec())
        );
        assert!(backend.delete("device", "7").unwrap());
        assert!(!backend.delete("device", "7").unwrap());
        assert_eq!(backend.read("device", "7").unwrap(), None);
    }

    #[test]
    fn test_scan_is_table_scoped() {
        let (_dir, backend) = open_temp();
        backend.write("device", "1", b"a").unwrap();
        backend.write("device", "2", b"b").unwrap();
        backend.write("reportingInterval", "1", b"c").unwrap();

        let rows = backend.scan("device", "").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "1");
        assert_eq!(rows[1].0, "2");
    }
}
