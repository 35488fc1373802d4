//! Durable storage for the TractorCare offline sync engine.
//!
//! The sync engine treats persistence as an opaque, string-keyed blob
//! store. Pending mutation lists and cached entity snapshots are serialized
//! to JSON before they reach this layer.
//!
//! # Architecture
//!
//! - [`DurableStore`] is the async boundary the engine depends on
//! - [`KvStore`] persists to a single DuckDB `kv` table and survives restarts
//! - [`MemoryStore`] keeps everything in a map, for tests and ephemeral use
//! - [`DurableStore::write_batch`] applies several puts/deletes atomically,
//!   so a reader never observes half of a queue update

mod error;
mod kv_store;
mod memory;

pub use error::{StorageError, StorageResult};
pub use kv_store::KvStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

/// One write in an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Put { key: String, value: String },
    Delete { key: String },
}

impl StoreOp {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        StoreOp::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        StoreOp::Delete { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            StoreOp::Put { key, .. } | StoreOp::Delete { key } => key,
        }
    }
}

/// String-keyed blob store that survives process restarts.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Reads the value stored under `key`.
    async fn get_string(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set_string(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Deletes `key`. Deleting a missing key is not an error.
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// Applies every op or none of them.
    async fn write_batch(&self, ops: Vec<StoreOp>) -> StorageResult<()>;
}
