//! DuckDB-backed key/value store.

use crate::error::StorageResult;
use crate::{DurableStore, StoreOp};
use async_trait::async_trait;
use duckdb::{params, Connection, OptionalExt};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// The queue is a handful of small JSON values.
const MEMORY_LIMIT: &str = "64MB";
const THREADS: u32 = 1;

/// DuckDB keeps its write-ahead log at `<db file>.wal`.
fn wal_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".wal");
    PathBuf::from(name)
}

/// Opens the database file, dropping a leftover WAL once if it blocks the open.
fn connect(path: &Path) -> StorageResult<Connection> {
    let conn = match Connection::open(path) {
        Ok(conn) => conn,
        Err(e) => {
            let wal = wal_path(path);
            if !wal.exists() || std::fs::remove_file(&wal).is_err() {
                return Err(e.into());
            }
            tracing::warn!("kv store at {} reopened without its WAL: {}", path.display(), e);
            Connection::open(path)?
        }
    };
    conn.execute_batch(&format!("SET memory_limit='{MEMORY_LIMIT}'; SET threads={THREADS};"))?;
    Ok(conn)
}

/// Durable key/value store backed by a single DuckDB table.
///
/// Cloning is cheap; clones share the connection.
#[derive(Clone)]
pub struct KvStore {
    conn: Arc<Mutex<Connection>>,
}

impl KvStore {
    /// Opens or creates a store at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = connect(path)?;
        initialize_kv_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_kv_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Acquires the connection, recovering from a poisoned lock.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("recovering from poisoned kv connection mutex");
            poisoned.into_inner()
        })
    }

    /// Reads a value.
    pub fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = self.conn();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Upserts a value.
    pub fn put(&self, key: &str, value: &str) -> StorageResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Deletes a value.
    pub fn delete(&self, key: &str) -> StorageResult<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM kv WHERE key = ?", params![key])?;
        Ok(())
    }

    /// Applies all ops in one transaction.
    pub fn apply_batch(&self, ops: &[StoreOp]) -> StorageResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for op in ops {
            match op {
                StoreOp::Put { key, value } => {
                    tx.execute(
                        "INSERT OR REPLACE INTO kv (key, value) VALUES (?, ?)",
                        params![key, value],
                    )?;
                }
                StoreOp::Delete { key } => {
                    tx.execute("DELETE FROM kv WHERE key = ?", params![key])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Lists all keys, sorted.
    pub fn keys(&self) -> StorageResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

#[async_trait]
impl DurableStore for KvStore {
    async fn get_string(&self, key: &str) -> StorageResult<Option<String>> {
        let store = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || store.get(&key)).await?
    }

    async fn set_string(&self, key: &str, value: &str) -> StorageResult<()> {
        let store = self.clone();
        let (key, value) = (key.to_string(), value.to_string());
        tokio::task::spawn_blocking(move || store.put(&key, &value)).await?
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let store = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || store.delete(&key)).await?
    }

    async fn write_batch(&self, ops: Vec<StoreOp>) -> StorageResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.apply_batch(&ops)).await?
    }
}

fn initialize_kv_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS kv (
            key VARCHAR PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wal_sits_next_to_the_database_file() {
        assert_eq!(
            wal_path(Path::new("/data/queue.duckdb")),
            PathBuf::from("/data/queue.duckdb.wal")
        );
        assert_eq!(wal_path(Path::new("queue")), PathBuf::from("queue.wal"));
    }

    #[test]
    fn connect_creates_a_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.duckdb");
        connect(&path).unwrap();
        assert!(path.exists());
    }
}
