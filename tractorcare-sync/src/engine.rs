//! The facade the presentation layer talks to.
//!
//! `SyncEngine` wires an explicitly injected store, gateway and connectivity
//! monitor into a queue, projection and synchronizer. Every write to the
//! queue or projection goes through here or through the synchronizer.

use crate::cache::SnapshotCache;
use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor};
use crate::error::{GatewayError, SyncError, SyncResult};
use crate::gateway::{with_timeout, RemoteGateway};
use crate::projection::{MaintenanceView, Projection, ProjectionBase, TractorView, UsageView};
use crate::queue::{MutationQueue, QueueEvent};
use crate::synchronizer::{DrainReport, DrainTrigger, SyncEvent, SyncState, SyncTally, Synchronizer};
use crate::task::BackgroundTask;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tractorcare_storage::DurableStore;
use tractorcare_types::{
    FailureClass, MaintenanceCreatePayload, MaintenanceOutlook, MaintenancePriority,
    MaintenanceStatus, MaintenanceUpdatePayload, MutationId, MutationPayload, PendingMutation,
    TractorUpdatePayload, UsageLogPayload,
};

/// Input for [`SyncEngine::add_maintenance`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewMaintenanceTask {
    pub tractor_id: String,
    pub task_type: String,
    pub task_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due_at_hours: Option<f64>,
    #[serde(default)]
    pub priority: MaintenancePriority,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub estimated_cost: Option<f64>,
}

/// Where [`SyncEngine::refresh`] got its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshSource {
    Remote,
    Cache,
    /// Offline with nothing cached; the projection was left as is.
    Empty,
}

pub struct SyncEngine {
    queue: Arc<MutationQueue>,
    projection: Arc<Projection>,
    synchronizer: Arc<Synchronizer>,
    connectivity: Arc<ConnectivityMonitor>,
    gateway: Arc<dyn RemoteGateway>,
    cache: SnapshotCache,
    config: SyncConfig,
    /// Held from the projection read that derives a mutation until its
    /// overlay is applied.
    submit_lock: tokio::sync::Mutex<()>,
}

impl SyncEngine {
    /// Restores the queue and cached snapshots from `store` and builds the engine.
    pub async fn open(
        store: Arc<dyn DurableStore>,
        gateway: Arc<dyn RemoteGateway>,
        connectivity: Arc<ConnectivityMonitor>,
        config: SyncConfig,
    ) -> SyncResult<Arc<Self>> {
        config.validate()?;

        let queue = Arc::new(MutationQueue::load(Arc::clone(&store), config.event_capacity).await?);
        let cache = SnapshotCache::new(store);
        let base = cache.load().await?.unwrap_or_default();
        let projection = Arc::new(Projection::new(base));
        projection.set_overlays(queue.snapshot());

        let synchronizer = Arc::new(Synchronizer::new(
            Arc::clone(&queue),
            Arc::clone(&gateway),
            Arc::clone(&projection),
            Some(Arc::clone(&connectivity)),
            config.clone(),
        ));

        info!(
            "[SYNC] Engine ready: {} pending, {}",
            queue.len(),
            if connectivity.is_online() { "online" } else { "offline" }
        );

        Ok(Arc::new(Self {
            queue,
            projection,
            synchronizer,
            connectivity,
            gateway,
            cache,
            config,
            submit_lock: tokio::sync::Mutex::new(()),
        }))
    }

    // ── Mutations ────────────────────────────────────────────────

    /// Logs `hours_used` engine hours on a tractor.
    pub async fn record_usage(
        &self,
        tractor_id: &str,
        hours_used: f64,
        notes: Option<String>,
    ) -> SyncResult<PendingMutation> {
        if !hours_used.is_finite() || hours_used <= 0.0 {
            return Err(SyncError::InvalidInput(format!(
                "hours used must be positive, got {hours_used}"
            )));
        }
        let _submit = self.submit_lock.lock().await;
        let view = self.known_tractor(tractor_id)?;
        let payload = UsageLogPayload {
            tractor_id: view.tractor.tractor_id.clone(),
            end_hours: view.tractor.engine_hours + hours_used,
            hours_used,
            notes,
            logged_at: Utc::now(),
        };
        self.submit(MutationId::new(), MutationPayload::UsageLog(payload))
            .await
    }

    /// Schedules a new maintenance task under a provisional id.
    pub async fn add_maintenance(&self, task: NewMaintenanceTask) -> SyncResult<PendingMutation> {
        if task.task_name.trim().is_empty() {
            return Err(SyncError::InvalidInput("task name is required".to_string()));
        }
        if task.due_at_hours.is_some_and(|h| !h.is_finite() || h < 0.0) {
            return Err(SyncError::InvalidInput(
                "due hours must be a non-negative number".to_string(),
            ));
        }
        let _submit = self.submit_lock.lock().await;
        let view = self.known_tractor(&task.tractor_id)?;

        let id = MutationId::new();
        let payload = MaintenanceCreatePayload {
            tractor_id: view.tractor.tractor_id,
            provisional_id: id.provisional(),
            task_type: task.task_type,
            task_name: task.task_name,
            description: task.description,
            due_date: task.due_date,
            due_at_hours: task.due_at_hours,
            priority: task.priority,
            notes: task.notes,
            estimated_cost: task.estimated_cost,
        };
        self.submit(id, MutationPayload::MaintenanceCreate(payload))
            .await
    }

    /// Changes fields of a known task, including one still pending creation.
    pub async fn update_maintenance(
        &self,
        mut update: MaintenanceUpdatePayload,
    ) -> SyncResult<PendingMutation> {
        let _submit = self.submit_lock.lock().await;
        let view = self.projection.view();
        let Some(existing) = view.maintenance.get(&update.task_id) else {
            return Err(SyncError::UnknownTask(update.task_id));
        };
        if update.status.is_none()
            && update.due_date.is_none()
            && update.due_at_hours.is_none()
            && update.priority.is_none()
            && update.notes.is_none()
            && update.completed_at.is_none()
        {
            return Err(SyncError::InvalidInput(
                "maintenance update changes nothing".to_string(),
            ));
        }
        update.tractor_id = existing.task.tractor_id.clone();
        self.submit(MutationId::new(), MutationPayload::MaintenanceUpdate(update))
            .await
    }

    /// Marks a task completed now.
    pub async fn complete_maintenance(
        &self,
        task_id: &str,
        notes: Option<String>,
    ) -> SyncResult<PendingMutation> {
        self.update_maintenance(MaintenanceUpdatePayload {
            task_id: task_id.to_string(),
            status: Some(MaintenanceStatus::Completed),
            completed_at: Some(Utc::now()),
            notes,
            ..Default::default()
        })
        .await
    }

    /// Edits tractor fields. Engine hours may never go down.
    pub async fn update_tractor(
        &self,
        mut update: TractorUpdatePayload,
    ) -> SyncResult<PendingMutation> {
        if update.is_empty() {
            return Err(SyncError::InvalidInput(
                "tractor update changes nothing".to_string(),
            ));
        }
        let _submit = self.submit_lock.lock().await;
        let view = self.known_tractor(&update.tractor_id)?;
        if let Some(hours) = update.engine_hours {
            if !hours.is_finite() || hours < view.tractor.engine_hours {
                return Err(SyncError::InvalidInput(format!(
                    "engine hours cannot decrease from {} to {}",
                    view.tractor.engine_hours, hours
                )));
            }
        }
        update.tractor_id = view.tractor.tractor_id;
        self.submit(MutationId::new(), MutationPayload::TractorFieldUpdate(update))
            .await
    }

    async fn submit(&self, id: MutationId, payload: MutationPayload) -> SyncResult<PendingMutation> {
        let mutation = self.queue.enqueue_as(id, payload).await?;
        self.projection.apply_optimistic(mutation.clone());

        if self.config.attempt_on_enqueue && self.is_online() {
            self.spawn_drain(DrainTrigger::Enqueued);
        }
        Ok(mutation)
    }

    /// Removes the queued mutation at `index` and its overlay.
    pub async fn discard(&self, index: usize) -> SyncResult<PendingMutation> {
        let removed = self.queue.discard(index).await?;
        self.projection.drop_overlay(removed.id);
        Ok(removed)
    }

    pub async fn discard_id(&self, id: MutationId) -> SyncResult<PendingMutation> {
        let removed = self.queue.discard_id(id).await?;
        self.projection.drop_overlay(removed.id);
        Ok(removed)
    }

    // ── Sync ─────────────────────────────────────────────────────

    /// Drains now and reports `{succeeded, remaining}`.
    pub async fn trigger_manual_sync(&self) -> SyncResult<SyncTally> {
        self.synchronizer.manual_sync().await
    }

    pub fn resume_after_reauth(&self) {
        self.synchronizer.resume_after_reauth();
    }

    /// Reloads the base from the remote, falling back to the cache.
    pub async fn refresh(&self) -> SyncResult<RefreshSource> {
        if !self.is_online() {
            return self.restore_cached().await;
        }

        match self.fetch_remote().await {
            Ok(base) => {
                self.projection.restore_base(base.clone());
                if let Err(e) = self.cache.save(&base).await {
                    warn!("[SYNC] Failed to cache snapshot: {}", e);
                }
                Ok(RefreshSource::Remote)
            }
            Err(e) if e.classify() == FailureClass::Auth => {
                self.synchronizer.invalidate_session();
                Err(SyncError::AuthRequired)
            }
            Err(e) => {
                warn!("[SYNC] Refresh failed, using cached data: {}", e);
                self.restore_cached().await
            }
        }
    }

    async fn fetch_remote(&self) -> Result<ProjectionBase, GatewayError> {
        let timeout = self.config.request_timeout();
        let tractors = with_timeout(timeout, self.gateway.fetch_tractors()).await?;

        let mut base = ProjectionBase::default();
        for tractor in tractors {
            let id = tractor.tractor_id.clone();
            let tasks = with_timeout(timeout, self.gateway.fetch_maintenance(&id)).await?;
            let usage = with_timeout(
                timeout,
                self.gateway
                    .fetch_usage_history(&id, self.config.usage_history_days),
            )
            .await?;
            base.maintenance
                .extend(tasks.into_iter().map(|t| (t.id.clone(), t)));
            base.usage.extend(usage.into_iter().map(|r| (r.id.clone(), r)));
            base.tractors.insert(id, tractor);
        }
        debug!(
            "[SYNC] Fetched {} tractors, {} tasks, {} usage records",
            base.tractors.len(),
            base.maintenance.len(),
            base.usage.len()
        );
        Ok(base)
    }

    async fn restore_cached(&self) -> SyncResult<RefreshSource> {
        match self.cache.load().await? {
            Some(base) => {
                self.projection.restore_base(base);
                Ok(RefreshSource::Cache)
            }
            None => Ok(RefreshSource::Empty),
        }
    }

    /// Starts the loop that drains the queue on every offline→online edge.
    pub fn spawn_connectivity_listener(self: &Arc<Self>) -> BackgroundTask {
        let engine = Arc::clone(self);
        let mut events = self.connectivity.subscribe();
        BackgroundTask::spawn(move |mut shutdown| async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(ConnectivityEvent { online: true, .. }) => engine.on_reconnect(),
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            debug!("[SYNC] Missed {} connectivity events", missed);
                            if engine.is_online() {
                                engine.on_reconnect();
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("[SYNC] Connectivity listener stopped");
        })
    }

    fn on_reconnect(&self) {
        if self.queue.is_empty() || self.synchronizer.is_session_invalid() {
            return;
        }
        self.spawn_drain(DrainTrigger::ConnectivityRestored);
    }

    fn spawn_drain(&self, trigger: DrainTrigger) {
        let synchronizer = Arc::clone(&self.synchronizer);
        tokio::spawn(async move {
            match synchronizer.request_drain(trigger).await {
                Ok(_) => {}
                Err(SyncError::AuthRequired) => debug!("[SYNC] Drain skipped: session invalid"),
                Err(e) => warn!("[SYNC] Background drain failed: {}", e),
            }
        });
    }

    // ── Reads ────────────────────────────────────────────────────

    pub fn pending_count(&self) -> usize {
        self.queue.pending_count()
    }

    pub fn pending(&self) -> Vec<PendingMutation> {
        self.queue.snapshot()
    }

    /// Pending mutations the server refused, for the user to retry or discard.
    pub fn actionable_failures(&self) -> Vec<PendingMutation> {
        self.queue.actionable()
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn sync_state(&self) -> SyncState {
        self.synchronizer.state()
    }

    pub fn last_report(&self) -> Option<DrainReport> {
        self.synchronizer.last_report()
    }

    pub fn tractors(&self) -> Vec<TractorView> {
        self.projection.tractors()
    }

    pub fn tractor(&self, tractor_id: &str) -> Option<TractorView> {
        self.projection.tractor(&normalize_tractor_id(tractor_id))
    }

    pub fn maintenance_for(&self, tractor_id: &str) -> Vec<MaintenanceView> {
        self.projection
            .maintenance_for(&normalize_tractor_id(tractor_id))
    }

    pub fn usage_for(&self, tractor_id: &str) -> Vec<UsageView> {
        self.projection.usage_for(&normalize_tractor_id(tractor_id))
    }

    pub fn outlook(&self, tractor_id: &str) -> Option<MaintenanceOutlook> {
        self.projection
            .outlook(&normalize_tractor_id(tractor_id), Utc::now())
    }

    pub fn projection(&self) -> &Arc<Projection> {
        &self.projection
    }

    pub fn synchronizer(&self) -> &Arc<Synchronizer> {
        &self.synchronizer
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn subscribe_queue(&self) -> broadcast::Receiver<QueueEvent> {
        self.queue.subscribe()
    }

    pub fn subscribe_sync(&self) -> broadcast::Receiver<SyncEvent> {
        self.synchronizer.subscribe()
    }

    pub fn subscribe_connectivity(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.connectivity.subscribe()
    }

    fn known_tractor(&self, tractor_id: &str) -> SyncResult<TractorView> {
        let id = normalize_tractor_id(tractor_id);
        self.projection
            .tractor(&id)
            .ok_or(SyncError::UnknownTractor(id))
    }
}

/// Tractor codes are stored uppercase by the API.
fn normalize_tractor_id(tractor_id: &str) -> String {
    tractor_id.trim().to_uppercase()
}
