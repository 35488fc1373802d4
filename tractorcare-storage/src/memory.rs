//! In-memory store with failure injection.

use crate::error::{StorageError, StorageResult};
use crate::{DurableStore, StoreOp};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A map-backed [`DurableStore`].
///
/// Clones share state, so a test can keep one handle while the engine owns
/// another, and "restart" by building a new engine over the same store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    map: Mutex<BTreeMap<String, String>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail until switched off again.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful write calls (a batch counts once).
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Copy of the current contents.
    pub fn dump(&self) -> BTreeMap<String, String> {
        self.map().clone()
    }

    fn map(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.inner
            .map
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("write rejected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get_string(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.map().get(key).cloned())
    }

    async fn set_string(&self, key: &str, value: &str) -> StorageResult<()> {
        self.check_writable()?;
        self.map().insert(key.to_string(), value.to_string());
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.check_writable()?;
        self.map().remove(key);
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn write_batch(&self, ops: Vec<StoreOp>) -> StorageResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        self.check_writable()?;
        let mut map = self.map();
        for op in ops {
            match op {
                StoreOp::Put { key, value } => {
                    map.insert(key, value);
                }
                StoreOp::Delete { key } => {
                    map.remove(&key);
                }
            }
        }
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
