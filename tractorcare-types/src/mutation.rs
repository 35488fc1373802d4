//! Queued mutations: user intents not yet confirmed by the server.

use crate::entity::{HealthStatus, MaintenancePriority, MaintenanceStatus, UsageIntensity};
use crate::id::MutationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of change a mutation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    UsageLog,
    MaintenanceCreate,
    MaintenanceUpdate,
    TractorFieldUpdate,
}

impl MutationKind {
    /// The storage bucket mutations of this kind are persisted in.
    pub fn bucket(&self) -> Bucket {
        match self {
            MutationKind::UsageLog => Bucket::UsageLogs,
            MutationKind::MaintenanceCreate | MutationKind::MaintenanceUpdate => {
                Bucket::MaintenanceTasks
            }
            MutationKind::TractorFieldUpdate => Bucket::TractorUpdates,
        }
    }
}

/// A per-kind namespace in the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    UsageLogs,
    MaintenanceTasks,
    TractorUpdates,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [
        Bucket::UsageLogs,
        Bucket::MaintenanceTasks,
        Bucket::TractorUpdates,
    ];

    /// The durable store key holding this bucket's pending list.
    pub fn key(&self) -> &'static str {
        match self {
            Bucket::UsageLogs => "pending_usage_logs",
            Bucket::MaintenanceTasks => "pending_maintenance_tasks",
            Bucket::TractorUpdates => "pending_tractor_updates",
        }
    }
}

/// Engine hours logged for a tractor.
///
/// `end_hours` is what the API records; `hours_used` is kept for display.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageLogPayload {
    pub tractor_id: String,
    pub end_hours: f64,
    pub hours_used: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub logged_at: DateTime<Utc>,
}

/// A new maintenance task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceCreatePayload {
    pub tractor_id: String,
    /// Local id shown until the server assigns one.
    pub provisional_id: String,
    pub task_type: String,
    pub task_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at_hours: Option<f64>,
    #[serde(default)]
    pub priority: MaintenancePriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
}

/// Field changes to an existing maintenance task. `None` leaves a field as is.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceUpdatePayload {
    pub task_id: String,
    pub tractor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MaintenanceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<MaintenancePriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Field changes to a tractor, mirroring the API's `TractorUpdate`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TractorUpdatePayload {
    pub tractor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_intensity: Option<UsageIntensity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_status: Option<HealthStatus>,
}

impl TractorUpdatePayload {
    /// True when no field would change.
    pub fn is_empty(&self) -> bool {
        self.engine_hours.is_none() && self.usage_intensity.is_none() && self.health_status.is_none()
    }
}

/// Typed payload of a mutation, tagged by kind on disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutationPayload {
    UsageLog(UsageLogPayload),
    MaintenanceCreate(MaintenanceCreatePayload),
    MaintenanceUpdate(MaintenanceUpdatePayload),
    TractorFieldUpdate(TractorUpdatePayload),
}

impl MutationPayload {
    pub fn kind(&self) -> MutationKind {
        match self {
            MutationPayload::UsageLog(_) => MutationKind::UsageLog,
            MutationPayload::MaintenanceCreate(_) => MutationKind::MaintenanceCreate,
            MutationPayload::MaintenanceUpdate(_) => MutationKind::MaintenanceUpdate,
            MutationPayload::TractorFieldUpdate(_) => MutationKind::TractorFieldUpdate,
        }
    }

    /// The id of the entity being changed; `None` for creates.
    pub fn target_id(&self) -> Option<&str> {
        match self {
            MutationPayload::UsageLog(p) => Some(&p.tractor_id),
            MutationPayload::MaintenanceCreate(_) => None,
            MutationPayload::MaintenanceUpdate(p) => Some(&p.task_id),
            MutationPayload::TractorFieldUpdate(p) => Some(&p.tractor_id),
        }
    }

    /// The tractor this mutation belongs to.
    pub fn tractor_id(&self) -> &str {
        match self {
            MutationPayload::UsageLog(p) => &p.tractor_id,
            MutationPayload::MaintenanceCreate(p) => &p.tractor_id,
            MutationPayload::MaintenanceUpdate(p) => &p.tractor_id,
            MutationPayload::TractorFieldUpdate(p) => &p.tractor_id,
        }
    }
}

/// How a delivery failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Network, timeout or 5xx. Retried on the next drain.
    Transient,
    /// The server refused the mutation (4xx). Retried, but shown to the user
    /// as discardable.
    Rejected,
    /// Credentials are no longer accepted. Needs re-authentication.
    Auth,
}

/// The most recent failed delivery of a mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeliveryFailure {
    pub class: FailureClass,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub at: DateTime<Utc>,
}

/// A queued mutation with its bookkeeping.
///
/// `attempt_count` and `last_failure` are queue-only; the gateway only ever
/// sees `payload`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    pub id: MutationId,
    pub seq: u64,
    pub payload: MutationPayload,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<DeliveryFailure>,
}

impl PendingMutation {
    pub fn new(id: MutationId, seq: u64, payload: MutationPayload) -> Self {
        Self {
            id,
            seq,
            payload,
            created_at: Utc::now(),
            attempt_count: 0,
            last_failure: None,
        }
    }

    pub fn kind(&self) -> MutationKind {
        self.payload.kind()
    }

    pub fn bucket(&self) -> Bucket {
        self.kind().bucket()
    }

    pub fn target_id(&self) -> Option<&str> {
        self.payload.target_id()
    }

    /// True when the last failure needs a human decision (retry or discard).
    pub fn is_actionable(&self) -> bool {
        self.last_failure
            .as_ref()
            .is_some_and(|f| f.class == FailureClass::Rejected)
    }

    /// Counts a failed delivery.
    pub fn record_failure(&mut self, failure: DeliveryFailure) {
        self.attempt_count += 1;
        self.last_failure = Some(failure);
    }

    /// Points a maintenance update at `to` if it targets `from`.
    ///
    /// Returns true if the target changed.
    pub fn retarget_task(&mut self, from: &str, to: &str) -> bool {
        match &mut self.payload {
            MutationPayload::MaintenanceUpdate(p) if p.task_id == from => {
                p.task_id = to.to_string();
                true
            }
            _ => false,
        }
    }
}
