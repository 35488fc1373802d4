//! Durable, ordered queue of pending mutations.
//!
//! Each mutation kind maps to a bucket key in the `DurableStore`. Every
//! structural change rewrites all buckets in a single `write_batch`, and the
//! in-memory list is only replaced after that write succeeds. The persisted
//! queue is therefore always a complete snapshot: a crash loses nothing and
//! never resurrects a removed entry.
//!
//! Writers are serialized by an async mutex held across the persist.
//! Readers ([`MutationQueue::snapshot`]) never wait on I/O.

use crate::error::{SyncError, SyncResult};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info};
use tractorcare_storage::{DurableStore, StorageError, StoreOp};
use tractorcare_types::{
    Bucket, DeliveryFailure, MutationId, MutationKind, MutationPayload, PendingMutation,
};

/// Change notifications emitted after each committed write.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Enqueued {
        id: MutationId,
        kind: MutationKind,
        pending: usize,
    },
    Discarded {
        id: MutationId,
        pending: usize,
    },
    Settled {
        confirmed: usize,
        failed: usize,
        pending: usize,
    },
}

impl QueueEvent {
    /// Queue length after the change.
    pub fn pending(&self) -> usize {
        match self {
            QueueEvent::Enqueued { pending, .. }
            | QueueEvent::Discarded { pending, .. }
            | QueueEvent::Settled { pending, .. } => *pending,
        }
    }
}

/// The outcome of a drain pass, applied to the queue in one write.
#[derive(Debug, Clone, Default)]
pub struct Settlement {
    /// Mutations the server confirmed; removed.
    pub confirmed: HashSet<MutationId>,
    /// Mutations that failed; kept with attempt count bumped.
    pub failures: HashMap<MutationId, DeliveryFailure>,
    /// Provisional task ids resolved to server ids: `(provisional, server)`.
    pub retargets: Vec<(String, String)>,
}

impl Settlement {
    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty() && self.failures.is_empty() && self.retargets.is_empty()
    }
}

/// Ordered pending mutations backed by a durable store.
pub struct MutationQueue {
    store: Arc<dyn DurableStore>,
    /// Held across every persist. Guards the next sequence number.
    write_lock: Mutex<u64>,
    committed: RwLock<Vec<PendingMutation>>,
    events: broadcast::Sender<QueueEvent>,
}

impl MutationQueue {
    /// Loads all buckets from the store, restoring global order by `seq`.
    pub async fn load(store: Arc<dyn DurableStore>, event_capacity: usize) -> SyncResult<Self> {
        let mut entries = Vec::new();
        for bucket in Bucket::ALL {
            let Some(raw) = store.get_string(bucket.key()).await? else {
                continue;
            };
            let mut list: Vec<PendingMutation> =
                serde_json::from_str(&raw).map_err(|source| SyncError::Corrupt {
                    key: bucket.key().to_string(),
                    source,
                })?;
            entries.append(&mut list);
        }
        entries.sort_by_key(|m| m.seq);

        let next_seq = entries.last().map(|m| m.seq + 1).unwrap_or(1);
        if !entries.is_empty() {
            info!("restored {} pending mutations", entries.len());
        }

        let (events, _) = broadcast::channel(event_capacity.max(1));
        Ok(Self {
            store,
            write_lock: Mutex::new(next_seq),
            committed: RwLock::new(entries),
            events,
        })
    }

    /// Appends a mutation with a fresh id. See [`MutationQueue::enqueue_as`].
    pub async fn enqueue(&self, payload: MutationPayload) -> SyncResult<PendingMutation> {
        self.enqueue_as(MutationId::new(), payload).await
    }

    /// Appends a mutation and persists the queue before returning.
    ///
    /// On a persistence failure nothing is committed and the error is
    /// returned: the caller must know the intent was not saved.
    pub async fn enqueue_as(
        &self,
        id: MutationId,
        payload: MutationPayload,
    ) -> SyncResult<PendingMutation> {
        let mut next_seq = self.write_lock.lock().await;
        let mutation = PendingMutation::new(id, *next_seq, payload);

        let mut entries = self.snapshot();
        entries.push(mutation.clone());
        self.persist(&entries).await?;

        *next_seq += 1;
        let pending = self.commit(entries);
        debug!(
            "queued {:?} mutation {} ({} pending)",
            mutation.kind(),
            mutation.id,
            pending
        );
        let _ = self.events.send(QueueEvent::Enqueued {
            id: mutation.id,
            kind: mutation.kind(),
            pending,
        });
        Ok(mutation)
    }

    /// Current queue in delivery order.
    pub fn snapshot(&self) -> Vec<PendingMutation> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Alias of [`MutationQueue::len`] for UI badges.
    pub fn pending_count(&self) -> usize {
        self.len()
    }

    pub fn get(&self, id: MutationId) -> Option<PendingMutation> {
        self.read().iter().find(|m| m.id == id).cloned()
    }

    /// Entries whose last failure needs the user's decision.
    pub fn actionable(&self) -> Vec<PendingMutation> {
        self.read()
            .iter()
            .filter(|m| m.is_actionable())
            .cloned()
            .collect()
    }

    /// Pending entries of one kind, in FIFO order.
    pub fn by_kind(&self, kind: MutationKind) -> Vec<PendingMutation> {
        self.read()
            .iter()
            .filter(|m| m.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Removes confirmed entries in one atomic write.
    pub async fn remove_confirmed(&self, ids: &HashSet<MutationId>) -> SyncResult<usize> {
        let settlement = Settlement {
            confirmed: ids.clone(),
            ..Default::default()
        };
        self.settle(settlement).await
    }

    /// Removes the entry at `index` (snapshot order) at the user's request.
    pub async fn discard(&self, index: usize) -> SyncResult<PendingMutation> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.snapshot();
        if index >= entries.len() {
            return Err(SyncError::IndexOutOfRange {
                index,
                len: entries.len(),
            });
        }
        let removed = entries.remove(index);
        self.finish_discard(entries, removed).await
    }

    /// Removes the entry with `id` at the user's request.
    pub async fn discard_id(&self, id: MutationId) -> SyncResult<PendingMutation> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.snapshot();
        let Some(index) = entries.iter().position(|m| m.id == id) else {
            return Err(SyncError::UnknownMutation(id));
        };
        let removed = entries.remove(index);
        self.finish_discard(entries, removed).await
    }

    async fn finish_discard(
        &self,
        entries: Vec<PendingMutation>,
        removed: PendingMutation,
    ) -> SyncResult<PendingMutation> {
        self.persist(&entries).await?;
        let pending = self.commit(entries);
        info!(
            "discarded {:?} mutation {} after {} attempts",
            removed.kind(),
            removed.id,
            removed.attempt_count
        );
        let _ = self.events.send(QueueEvent::Discarded {
            id: removed.id,
            pending,
        });
        Ok(removed)
    }

    /// Applies a drain pass outcome in one atomic write.
    ///
    /// Entries enqueued after the pass began are left untouched. Returns the
    /// queue length afterwards. Skips the write entirely when nothing changes.
    pub async fn settle(&self, settlement: Settlement) -> SyncResult<usize> {
        let _guard = self.write_lock.lock().await;
        let current = self.snapshot();
        if settlement.is_empty() {
            return Ok(current.len());
        }

        let mut next = Vec::with_capacity(current.len());
        let mut confirmed = 0;
        let mut failed = 0;
        for mut mutation in current.iter().cloned() {
            if settlement.confirmed.contains(&mutation.id) {
                confirmed += 1;
                continue;
            }
            if let Some(failure) = settlement.failures.get(&mutation.id) {
                mutation.record_failure(failure.clone());
                failed += 1;
            }
            for (from, to) in &settlement.retargets {
                mutation.retarget_task(from, to);
            }
            next.push(mutation);
        }

        if next == current {
            return Ok(current.len());
        }

        self.persist(&next).await?;
        let pending = self.commit(next);
        debug!("settled queue: {confirmed} confirmed, {failed} failed, {pending} pending");
        let _ = self.events.send(QueueEvent::Settled {
            confirmed,
            failed,
            pending,
        });
        Ok(pending)
    }

    /// Writes every bucket of `entries` in one batch. Empty buckets are deleted.
    async fn persist(&self, entries: &[PendingMutation]) -> SyncResult<()> {
        let mut buckets: BTreeMap<Bucket, Vec<&PendingMutation>> =
            Bucket::ALL.iter().map(|b| (*b, Vec::new())).collect();
        for mutation in entries {
            buckets.entry(mutation.bucket()).or_default().push(mutation);
        }

        let mut ops = Vec::with_capacity(buckets.len());
        for (bucket, list) in buckets {
            if list.is_empty() {
                ops.push(StoreOp::delete(bucket.key()));
            } else {
                let json = serde_json::to_string(&list).map_err(StorageError::from)?;
                ops.push(StoreOp::put(bucket.key(), json));
            }
        }

        self.store.write_batch(ops).await.map_err(|e| {
            error!("failed to persist pending mutations: {e}");
            SyncError::Persistence(e)
        })
    }

    fn commit(&self, entries: Vec<PendingMutation>) -> usize {
        let mut committed = self
            .committed
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *committed = entries;
        committed.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<PendingMutation>> {
        self.committed
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
