//! Drain loop: delivers queued mutations to the remote gateway.
//!
//! At most one pass runs at a time. A trigger that arrives while a pass is
//! running is folded into a single follow-up pass run by the current owner,
//! so rapid connectivity flaps never produce overlapping drains or racing
//! queue writes.

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::gateway::{deliver, with_timeout, RemoteEntity, RemoteGateway};
use crate::projection::Projection;
use crate::queue::{MutationQueue, Settlement};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tractorcare_types::{
    is_provisional, DeliveryFailure, FailureClass, MutationId, MutationKind, MutationPayload,
};
type TokioMutex<T> = tokio::sync::Mutex<T>;
type TokioMutexGuard<'a, T> = tokio::sync::MutexGuard<'a, T>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Draining,
    IdleWithFailures,
}

/// What started a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainTrigger {
    ConnectivityRestored,
    Manual,
    Enqueued,
}

/// Result of a manual sync, for UI feedback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncTally {
    pub succeeded: usize,
    pub remaining: usize,
}

/// Summary of one drain pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrainReport {
    pub trigger: DrainTrigger,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Subset of `failed` the server refused outright.
    pub rejected: usize,
    /// Updates held back because their task has no server id yet.
    pub deferred: usize,
    /// Subset of `succeeded` the server accepted with an unreadable body.
    pub unverified: usize,
    pub remaining: usize,
    pub auth_halted: bool,
    /// The pass did not run because the device is offline.
    pub skipped: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DrainReport {
    fn empty(trigger: DrainTrigger, remaining: usize, skipped: bool) -> Self {
        let now = Utc::now();
        Self {
            trigger,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            rejected: 0,
            deferred: 0,
            unverified: 0,
            remaining,
            auth_halted: false,
            skipped,
            started_at: now,
            finished_at: now,
        }
    }
}

/// Events emitted by the synchronizer for the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    StateChanged { state: SyncState },
    DrainStarted { trigger: DrainTrigger, pending: usize },
    MutationConfirmed { id: MutationId, kind: MutationKind },
    MutationFailed { id: MutationId, failure: DeliveryFailure },
    DrainCompleted(DrainReport),
    /// Credentials were rejected; drains stop until re-authentication.
    SessionInvalid,
}

pub struct Synchronizer {
    queue: Arc<MutationQueue>,
    gateway: Arc<dyn RemoteGateway>,
    projection: Arc<Projection>,
    connectivity: Option<Arc<ConnectivityMonitor>>,
    config: SyncConfig,
    drain_lock: TokioMutex<()>,
    rerun: Mutex<Option<DrainTrigger>>,
    state: RwLock<SyncState>,
    session_invalid: AtomicBool,
    last_report: RwLock<Option<DrainReport>>,
    events: broadcast::Sender<SyncEvent>,
    passes: AtomicU64,
}

impl Synchronizer {
    pub fn new(
        queue: Arc<MutationQueue>,
        gateway: Arc<dyn RemoteGateway>,
        projection: Arc<Projection>,
        connectivity: Option<Arc<ConnectivityMonitor>>,
        config: SyncConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let initial = if queue.is_empty() {
            SyncState::Idle
        } else {
            SyncState::IdleWithFailures
        };
        Self {
            queue,
            gateway,
            projection,
            connectivity,
            config,
            drain_lock: TokioMutex::new(()),
            rerun: Mutex::new(None),
            state: RwLock::new(initial),
            session_invalid: AtomicBool::new(false),
            last_report: RwLock::new(None),
            events,
            passes: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SyncState {
        *self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    pub fn last_report(&self) -> Option<DrainReport> {
        self.last_report
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn is_session_invalid(&self) -> bool {
        self.session_invalid.load(Ordering::SeqCst)
    }

    /// Number of passes that actually ran (offline skips excluded).
    pub fn pass_count(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Enters the session-invalid condition after a rejected credential.
    pub fn invalidate_session(&self) {
        if !self.session_invalid.swap(true, Ordering::SeqCst) {
            warn!("[SYNC] Session invalid, drains halted until re-authentication");
            let _ = self.events.send(SyncEvent::SessionInvalid);
        }
    }

    /// Clears the session-invalid condition after the host re-authenticated.
    pub fn resume_after_reauth(&self) {
        if self.session_invalid.swap(false, Ordering::SeqCst) {
            info!("[SYNC] Session restored, drains resumed");
        }
    }

    /// Requests a drain without waiting for a running one.
    ///
    /// Returns `None` when a pass is already running; the running owner
    /// performs one more pass on this trigger's behalf.
    pub async fn request_drain(&self, trigger: DrainTrigger) -> SyncResult<Option<SyncTally>> {
        if self.is_session_invalid() {
            return Err(SyncError::AuthRequired);
        }
        self.set_rerun(trigger);
        match self.drain_lock.try_lock() {
            Ok(guard) => self.drive(guard).await.map(Some),
            Err(_) => {
                debug!("[SYNC] Drain already running, {:?} trigger coalesced", trigger);
                Ok(None)
            }
        }
    }

    /// Runs a drain and waits for its tally, queuing behind a running pass.
    pub async fn manual_sync(&self) -> SyncResult<SyncTally> {
        if self.is_session_invalid() {
            return Err(SyncError::AuthRequired);
        }
        let guard = self.drain_lock.lock().await;
        self.set_rerun(DrainTrigger::Manual);
        self.drive(guard).await
    }

    async fn drive(&self, guard: TokioMutexGuard<'_, ()>) -> SyncResult<SyncTally> {
        let mut guard = Some(guard);
        let mut tally = SyncTally {
            succeeded: 0,
            remaining: self.queue.len(),
        };

        loop {
            while let Some(trigger) = self.take_rerun() {
                let report = self.drain_pass(trigger).await?;
                tally.succeeded += report.succeeded;
                tally.remaining = report.remaining;
                if report.auth_halted {
                    return Err(SyncError::AuthRequired);
                }
            }

            // Release first, then re-check: a trigger that lost the
            // try_lock race just before the release would otherwise be lost.
            drop(guard.take());
            if !self.has_rerun() {
                break;
            }
            match self.drain_lock.try_lock() {
                Ok(next) => guard = Some(next),
                Err(_) => break,
            }
        }

        Ok(tally)
    }

    async fn drain_pass(&self, trigger: DrainTrigger) -> SyncResult<DrainReport> {
        if self.is_session_invalid() {
            return Err(SyncError::AuthRequired);
        }

        let online = self
            .connectivity
            .as_ref()
            .is_none_or(|monitor| monitor.is_online());
        if trigger != DrainTrigger::Manual && !online {
            debug!("[SYNC] Offline, skipping {:?} drain", trigger);
            return Ok(DrainReport::empty(trigger, self.queue.len(), true));
        }

        self.passes.fetch_add(1, Ordering::SeqCst);
        let pending = self.queue.snapshot();
        if pending.is_empty() {
            self.set_state(SyncState::Idle);
            let report = DrainReport::empty(trigger, 0, false);
            self.finish(report.clone());
            return Ok(report);
        }

        info!("[SYNC] Draining {} pending mutations ({:?})", pending.len(), trigger);
        self.set_state(SyncState::Draining);
        let _ = self.events.send(SyncEvent::DrainStarted {
            trigger,
            pending: pending.len(),
        });

        let mut report = DrainReport::empty(trigger, 0, false);
        report.started_at = Utc::now();
        let mut settlement = Settlement::default();
        let mut confirmations: Vec<(MutationId, RemoteEntity)> = Vec::new();
        let mut resolved: HashMap<String, String> = HashMap::new();
        let queued_creates: HashSet<String> = pending
            .iter()
            .filter_map(|m| match &m.payload {
                MutationPayload::MaintenanceCreate(create) => Some(create.provisional_id.clone()),
                _ => None,
            })
            .collect();
        let timeout = self.config.request_timeout();

        for mutation in pending {
            let mut payload = mutation.payload.clone();
            if let MutationPayload::MaintenanceUpdate(update) = &mut payload {
                if let Some(server_id) = resolved.get(&update.task_id) {
                    update.task_id = server_id.clone();
                } else if is_provisional(&update.task_id) {
                    if queued_creates.contains(&update.task_id) {
                        debug!(
                            "[SYNC] Holding update {} until task {} is created",
                            mutation.id, update.task_id
                        );
                        report.deferred += 1;
                    } else {
                        let failure = DeliveryFailure {
                            class: FailureClass::Rejected,
                            message: format!("task {} was never created", update.task_id),
                            status: None,
                            at: Utc::now(),
                        };
                        warn!("[SYNC] Update {} targets a discarded task", mutation.id);
                        report.failed += 1;
                        report.rejected += 1;
                        let _ = self.events.send(SyncEvent::MutationFailed {
                            id: mutation.id,
                            failure: failure.clone(),
                        });
                        settlement.failures.insert(mutation.id, failure);
                    }
                    continue;
                }
            }

            report.attempted += 1;
            match deliver(self.gateway.as_ref(), &payload, timeout).await {
                Ok(entity) => {
                    if let (
                        MutationPayload::MaintenanceCreate(create),
                        RemoteEntity::MaintenanceTask(task),
                    ) = (&payload, &entity)
                    {
                        resolved.insert(create.provisional_id.clone(), task.id.clone());
                        settlement
                            .retargets
                            .push((create.provisional_id.clone(), task.id.clone()));
                    }
                    confirmations.push((mutation.id, entity));
                    settlement.confirmed.insert(mutation.id);
                    report.succeeded += 1;
                    let _ = self.events.send(SyncEvent::MutationConfirmed {
                        id: mutation.id,
                        kind: mutation.kind(),
                    });
                }
                Err(err) if err.was_applied() => {
                    warn!("[SYNC] Mutation {} applied but unconfirmed: {}", mutation.id, err);
                    settlement.confirmed.insert(mutation.id);
                    report.succeeded += 1;
                    report.unverified += 1;
                    let _ = self.events.send(SyncEvent::MutationConfirmed {
                        id: mutation.id,
                        kind: mutation.kind(),
                    });
                }
                Err(err) => {
                    let failure = err.to_failure();
                    if failure.class == FailureClass::Auth {
                        warn!("[SYNC] Credentials rejected, halting drain: {}", err);
                        self.invalidate_session();
                        report.auth_halted = true;
                        break;
                    }
                    if failure.class == FailureClass::Rejected {
                        report.rejected += 1;
                        warn!("[SYNC] Server rejected mutation {}: {}", mutation.id, err);
                    } else {
                        debug!("[SYNC] Mutation {} will be retried: {}", mutation.id, err);
                    }
                    report.failed += 1;
                    let _ = self.events.send(SyncEvent::MutationFailed {
                        id: mutation.id,
                        failure: failure.clone(),
                    });
                    settlement.failures.insert(mutation.id, failure);
                }
            }
        }

        report.remaining = match self.queue.settle(settlement).await {
            Ok(remaining) => remaining,
            Err(e) => {
                error!("[SYNC] Failed to persist drain outcome: {}", e);
                self.projection.set_overlays(self.queue.snapshot());
                self.set_state(SyncState::IdleWithFailures);
                return Err(e);
            }
        };
        // Confirmed entities join the base only once the queue has let go of
        // their mutations.
        for (id, entity) in confirmations {
            self.projection.confirm(id, entity);
        }
        self.projection.set_overlays(self.queue.snapshot());
        report.finished_at = Utc::now();

        self.set_state(if report.remaining == 0 {
            SyncState::Idle
        } else {
            SyncState::IdleWithFailures
        });

        let wants_refresh = report.unverified > 0
            || (report.succeeded > 0 && self.config.refresh_after_drain);
        if wants_refresh && !report.auth_halted {
            self.refresh_tractors().await;
        }

        info!(
            "[SYNC] Drain finished: {} succeeded, {} failed, {} remaining",
            report.succeeded, report.failed, report.remaining
        );
        self.finish(report.clone());
        Ok(report)
    }

    async fn refresh_tractors(&self) {
        let fetch = self.gateway.fetch_tractors();
        match with_timeout(self.config.request_timeout(), fetch).await {
            Ok(tractors) => {
                debug!("[SYNC] Refreshed {} tractors after drain", tractors.len());
                self.projection.replace_tractors(tractors);
            }
            Err(e) => warn!("[SYNC] Post-drain refresh failed: {}", e),
        }
    }

    fn finish(&self, report: DrainReport) {
        *self.last_report.write().unwrap_or_else(|p| p.into_inner()) = Some(report.clone());
        let _ = self.events.send(SyncEvent::DrainCompleted(report));
    }

    fn set_state(&self, next: SyncState) {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        if *state != next {
            *state = next;
            let _ = self.events.send(SyncEvent::StateChanged { state: next });
        }
    }

    /// Records a pending trigger. A manual trigger takes precedence.
    fn set_rerun(&self, trigger: DrainTrigger) {
        let mut rerun = self.rerun.lock().unwrap_or_else(|p| p.into_inner());
        match *rerun {
            Some(DrainTrigger::Manual) => {}
            _ => *rerun = Some(trigger),
        }
    }

    fn take_rerun(&self) -> Option<DrainTrigger> {
        self.rerun.lock().unwrap_or_else(|p| p.into_inner()).take()
    }

    fn has_rerun(&self) -> bool {
        self.rerun.lock().unwrap_or_else(|p| p.into_inner()).is_some()
    }
}
