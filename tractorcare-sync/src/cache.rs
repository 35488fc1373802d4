//! Last-known remote snapshots, so an offline cold start has data to show.

use crate::error::{SyncError, SyncResult};
use crate::projection::ProjectionBase;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;
use tractorcare_storage::{DurableStore, StorageError, StoreOp};
use tractorcare_types::{MaintenanceTask, Tractor, UsageRecord};

pub const CACHED_TRACTORS_KEY: &str = "cached_tractors";
pub const CACHED_MAINTENANCE_KEY: &str = "cached_maintenance_tasks";
pub const CACHED_USAGE_KEY: &str = "cached_usage_records";

pub struct SnapshotCache {
    store: Arc<dyn DurableStore>,
}

impl SnapshotCache {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// Writes all three collections in one batch.
    pub async fn save(&self, base: &ProjectionBase) -> SyncResult<()> {
        let tractors: Vec<&Tractor> = base.tractors.values().collect();
        let tasks: Vec<&MaintenanceTask> = base.maintenance.values().collect();
        let usage: Vec<&UsageRecord> = base.usage.values().collect();

        let ops = vec![
            StoreOp::put(CACHED_TRACTORS_KEY, to_json(&tractors)?),
            StoreOp::put(CACHED_MAINTENANCE_KEY, to_json(&tasks)?),
            StoreOp::put(CACHED_USAGE_KEY, to_json(&usage)?),
        ];
        self.store.write_batch(ops).await?;
        debug!(
            "cached {} tractors, {} tasks, {} usage records",
            tractors.len(),
            tasks.len(),
            usage.len()
        );
        Ok(())
    }

    /// Loads the cached snapshot. `None` when nothing was ever cached.
    pub async fn load(&self) -> SyncResult<Option<ProjectionBase>> {
        let tractors: Option<Vec<Tractor>> = self.read(CACHED_TRACTORS_KEY).await?;
        let Some(tractors) = tractors else {
            return Ok(None);
        };
        let tasks: Vec<MaintenanceTask> = self.read(CACHED_MAINTENANCE_KEY).await?.unwrap_or_default();
        let usage: Vec<UsageRecord> = self.read(CACHED_USAGE_KEY).await?.unwrap_or_default();

        Ok(Some(ProjectionBase {
            tractors: tractors
                .into_iter()
                .map(|t| (t.tractor_id.clone(), t))
                .collect(),
            maintenance: tasks.into_iter().map(|t| (t.id.clone(), t)).collect(),
            usage: usage.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }))
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> SyncResult<Option<T>> {
        let Some(raw) = self.store.get_string(key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| SyncError::Corrupt {
                key: key.to_string(),
                source,
            })
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> SyncResult<String> {
    serde_json::to_string(value).map_err(|e| SyncError::Persistence(StorageError::from(e)))
}
