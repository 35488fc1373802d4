//! Authoritative base plus optimistic overlays.
//!
//! The projection never patches its base in response to local intent.
//! Instead it keeps the last server state and the ordered list of pending
//! mutations, and every read goes through [`merge`]. A refresh that replaces
//! the base therefore cannot erase an in-flight edit: the overlay is simply
//! applied again on top of the new data.

use crate::gateway::RemoteEntity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use tractorcare_types::{
    maintenance_outlook, MaintenanceOutlook, MaintenanceStatus, MaintenanceTask, MutationId,
    MutationPayload, PendingMutation, Tractor, UsageRecord, PROVISIONAL_PREFIX,
};

/// The last known server state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectionBase {
    /// Keyed by `tractor_id`.
    pub tractors: BTreeMap<String, Tractor>,
    /// Keyed by task id.
    pub maintenance: BTreeMap<String, MaintenanceTask>,
    /// Keyed by record id.
    pub usage: BTreeMap<String, UsageRecord>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TractorView {
    pub tractor: Tractor,
    /// Fields currently shadowed by unsynced mutations.
    pub pending_fields: BTreeSet<&'static str>,
    /// Unsynced mutations touching this tractor, of any kind.
    pub pending_mutations: usize,
}

impl TractorView {
    pub fn is_pending(&self) -> bool {
        self.pending_mutations > 0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MaintenanceView {
    pub task: MaintenanceTask,
    pub pending_fields: BTreeSet<&'static str>,
    /// The task exists only locally and carries a provisional id.
    pub provisional: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UsageView {
    pub record: UsageRecord,
    pub pending: bool,
}

/// The result of [`merge`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergedView {
    pub tractors: BTreeMap<String, TractorView>,
    pub maintenance: BTreeMap<String, MaintenanceView>,
    pub usage: Vec<UsageView>,
}

/// Applies `pending` in order on top of `base`.
///
/// Overlays that refer to entities missing from the base are skipped for
/// that entity but still counted where they can be; nothing here fails.
pub fn merge(base: &ProjectionBase, pending: &[PendingMutation]) -> MergedView {
    let mut view = MergedView {
        tractors: base
            .tractors
            .iter()
            .map(|(id, t)| {
                (
                    id.clone(),
                    TractorView {
                        tractor: t.clone(),
                        pending_fields: BTreeSet::new(),
                        pending_mutations: 0,
                    },
                )
            })
            .collect(),
        maintenance: base
            .maintenance
            .iter()
            .map(|(id, t)| {
                (
                    id.clone(),
                    MaintenanceView {
                        task: t.clone(),
                        pending_fields: BTreeSet::new(),
                        provisional: false,
                    },
                )
            })
            .collect(),
        usage: base
            .usage
            .values()
            .map(|r| UsageView {
                record: r.clone(),
                pending: false,
            })
            .collect(),
    };

    for mutation in pending {
        if let Some(tv) = view.tractors.get_mut(mutation.payload.tractor_id()) {
            tv.pending_mutations += 1;
        }

        match &mutation.payload {
            MutationPayload::UsageLog(p) => {
                if let Some(tv) = view.tractors.get_mut(&p.tractor_id) {
                    tv.tractor.engine_hours = tv.tractor.engine_hours.max(p.end_hours);
                    tv.pending_fields.insert("engine_hours");
                }
                view.usage.push(UsageView {
                    record: UsageRecord {
                        id: format!("{PROVISIONAL_PREFIX}{}", mutation.id),
                        tractor_id: p.tractor_id.clone(),
                        date: p.logged_at,
                        start_hours: p.end_hours - p.hours_used,
                        end_hours: p.end_hours,
                        hours_used: p.hours_used,
                        notes: p.notes.clone(),
                    },
                    pending: true,
                });
            }
            MutationPayload::MaintenanceCreate(p) => {
                let task = MaintenanceTask {
                    id: p.provisional_id.clone(),
                    tractor_id: p.tractor_id.clone(),
                    task_type: p.task_type.clone(),
                    task_name: p.task_name.clone(),
                    description: p.description.clone(),
                    due_date: p.due_date,
                    due_at_hours: p.due_at_hours,
                    priority: p.priority,
                    status: MaintenanceStatus::Pending,
                    notes: p.notes.clone(),
                    estimated_cost: p.estimated_cost,
                    completed_at: None,
                    created_at: mutation.created_at,
                };
                view.maintenance.insert(
                    task.id.clone(),
                    MaintenanceView {
                        task,
                        pending_fields: BTreeSet::new(),
                        provisional: true,
                    },
                );
            }
            MutationPayload::MaintenanceUpdate(p) => {
                let Some(mv) = view.maintenance.get_mut(&p.task_id) else {
                    continue;
                };
                if let Some(status) = p.status {
                    mv.task.status = status;
                    mv.pending_fields.insert("status");
                }
                if let Some(due_date) = p.due_date {
                    mv.task.due_date = Some(due_date);
                    mv.pending_fields.insert("due_date");
                }
                if let Some(hours) = p.due_at_hours {
                    mv.task.due_at_hours = Some(hours);
                    mv.pending_fields.insert("due_at_hours");
                }
                if let Some(priority) = p.priority {
                    mv.task.priority = priority;
                    mv.pending_fields.insert("priority");
                }
                if let Some(notes) = &p.notes {
                    mv.task.notes = Some(notes.clone());
                    mv.pending_fields.insert("notes");
                }
                if let Some(completed_at) = p.completed_at {
                    mv.task.completed_at = Some(completed_at);
                    mv.pending_fields.insert("completed_at");
                }
            }
            MutationPayload::TractorFieldUpdate(p) => {
                let Some(tv) = view.tractors.get_mut(&p.tractor_id) else {
                    continue;
                };
                if let Some(hours) = p.engine_hours {
                    tv.tractor.engine_hours = hours;
                    tv.pending_fields.insert("engine_hours");
                }
                if let Some(intensity) = p.usage_intensity {
                    tv.tractor.usage_intensity = intensity;
                    tv.pending_fields.insert("usage_intensity");
                }
                if let Some(health) = p.health_status {
                    tv.tractor.health_status = health;
                    tv.pending_fields.insert("health_status");
                }
            }
        }
    }

    view.usage.sort_by(|a, b| a.record.date.cmp(&b.record.date));
    view
}

struct State {
    base: ProjectionBase,
    overlays: Vec<PendingMutation>,
}

/// Thread-safe holder of base and overlays.
pub struct Projection {
    state: RwLock<State>,
}

impl Default for Projection {
    fn default() -> Self {
        Self::new(ProjectionBase::default())
    }
}

impl Projection {
    pub fn new(base: ProjectionBase) -> Self {
        Self {
            state: RwLock::new(State {
                base,
                overlays: Vec::new(),
            }),
        }
    }

    /// Replaces all tractors with a fresh server list.
    pub fn replace_tractors(&self, tractors: Vec<Tractor>) {
        let mut state = self.write();
        state.base.tractors = tractors
            .into_iter()
            .map(|t| (t.tractor_id.clone(), t))
            .collect();
    }

    /// Replaces the tasks of one tractor.
    pub fn replace_maintenance(&self, tractor_id: &str, tasks: Vec<MaintenanceTask>) {
        let mut state = self.write();
        state.base.maintenance.retain(|_, t| t.tractor_id != tractor_id);
        for task in tasks {
            state.base.maintenance.insert(task.id.clone(), task);
        }
    }

    /// Replaces the usage history of one tractor.
    pub fn replace_usage(&self, tractor_id: &str, records: Vec<UsageRecord>) {
        let mut state = self.write();
        state.base.usage.retain(|_, r| r.tractor_id != tractor_id);
        for record in records {
            state.base.usage.insert(record.id.clone(), record);
        }
    }

    /// Swaps in a whole base, e.g. one loaded from the snapshot cache.
    pub fn restore_base(&self, base: ProjectionBase) {
        self.write().base = base;
    }

    pub fn base(&self) -> ProjectionBase {
        self.read().base.clone()
    }

    /// Replaces the overlay list with the queue's current contents.
    pub fn set_overlays(&self, pending: Vec<PendingMutation>) {
        self.write().overlays = pending;
    }

    /// Adds an overlay for a freshly enqueued mutation.
    ///
    /// An overlay with the same id is replaced in place.
    pub fn apply_optimistic(&self, mutation: PendingMutation) {
        let mut state = self.write();
        match state.overlays.iter_mut().find(|m| m.id == mutation.id) {
            Some(existing) => *existing = mutation,
            None => state.overlays.push(mutation),
        }
    }

    /// Removes an overlay without touching the base.
    pub fn drop_overlay(&self, id: MutationId) -> bool {
        let mut state = self.write();
        let before = state.overlays.len();
        state.overlays.retain(|m| m.id != id);
        state.overlays.len() != before
    }

    pub fn overlay_count(&self) -> usize {
        self.read().overlays.len()
    }

    /// Folds a confirmed server entity into the base and drops its overlay.
    pub fn confirm(&self, id: MutationId, entity: RemoteEntity) {
        let mut state = self.write();
        let index = state.overlays.iter().position(|m| m.id == id);
        let overlay = index.map(|i| state.overlays.remove(i));

        match entity {
            RemoteEntity::Tractor(tractor) => {
                state.base.tractors.insert(tractor.tractor_id.clone(), tractor);
            }
            RemoteEntity::MaintenanceTask(task) => {
                if let Some(MutationPayload::MaintenanceCreate(p)) = overlay.map(|m| m.payload) {
                    state.base.maintenance.remove(&p.provisional_id);
                    for pending in state.overlays.iter_mut() {
                        pending.retarget_task(&p.provisional_id, &task.id);
                    }
                }
                state.base.maintenance.insert(task.id.clone(), task);
            }
            RemoteEntity::UsageRecord(record) => {
                if let Some(tractor) = state.base.tractors.get_mut(&record.tractor_id) {
                    tractor.engine_hours = tractor.engine_hours.max(record.end_hours);
                }
                state.base.usage.insert(record.id.clone(), record);
            }
        }
    }

    /// The full merged view.
    pub fn view(&self) -> MergedView {
        let state = self.read();
        merge(&state.base, &state.overlays)
    }

    pub fn tractors(&self) -> Vec<TractorView> {
        self.view().tractors.into_values().collect()
    }

    pub fn tractor(&self, tractor_id: &str) -> Option<TractorView> {
        self.view().tractors.remove(tractor_id)
    }

    /// Tasks for a tractor, ordered by due date with undated tasks last.
    pub fn maintenance_for(&self, tractor_id: &str) -> Vec<MaintenanceView> {
        let mut tasks: Vec<_> = self
            .view()
            .maintenance
            .into_values()
            .filter(|m| m.task.tractor_id == tractor_id)
            .collect();
        tasks.sort_by_key(|m| (m.task.due_date.is_none(), m.task.due_date));
        tasks
    }

    pub fn usage_for(&self, tractor_id: &str) -> Vec<UsageView> {
        self.view()
            .usage
            .into_iter()
            .filter(|u| u.record.tractor_id == tractor_id)
            .collect()
    }

    /// Maintenance outlook over merged state.
    pub fn outlook(&self, tractor_id: &str, now: DateTime<Utc>) -> Option<MaintenanceOutlook> {
        let view = self.view();
        let tractor = view.tractors.get(tractor_id)?;
        let tasks: Vec<MaintenanceTask> = view
            .maintenance
            .values()
            .filter(|m| m.task.tractor_id == tractor_id)
            .map(|m| m.task.clone())
            .collect();
        Some(maintenance_outlook(&tractor.tractor, &tasks, now))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }
}
