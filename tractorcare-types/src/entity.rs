//! Entities mirrored from the TractorCare API.
//!
//! Field names follow the API's JSON. Optional fields default so that
//! partial server responses still decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How hard a tractor is worked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageIntensity {
    Light,
    #[default]
    Moderate,
    Heavy,
    Extreme,
}

/// Reported or derived health of a tractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Excellent,
    #[default]
    Good,
    Fair,
    Poor,
    Critical,
}

impl HealthStatus {
    /// Maps a 0-100 health score to a status band.
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            HealthStatus::Excellent
        } else if score >= 75.0 {
            HealthStatus::Good
        } else if score >= 60.0 {
            HealthStatus::Fair
        } else if score >= 40.0 {
            HealthStatus::Poor
        } else {
            HealthStatus::Critical
        }
    }
}

/// Priority of a maintenance task. The API has used both cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenancePriority {
    #[serde(alias = "LOW")]
    Low,
    #[default]
    #[serde(alias = "MEDIUM")]
    Medium,
    #[serde(alias = "HIGH")]
    High,
    #[serde(alias = "CRITICAL")]
    Critical,
}

/// Lifecycle status of a maintenance task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceStatus {
    #[default]
    #[serde(alias = "PENDING")]
    Pending,
    #[serde(alias = "SCHEDULED")]
    Scheduled,
    #[serde(alias = "DUE")]
    Due,
    #[serde(alias = "OVERDUE")]
    Overdue,
    #[serde(alias = "IN_PROGRESS")]
    InProgress,
    #[serde(alias = "COMPLETED")]
    Completed,
    #[serde(alias = "CANCELLED")]
    Cancelled,
}

impl MaintenanceStatus {
    /// True for statuses that no longer need attention.
    pub fn is_closed(&self) -> bool {
        matches!(self, MaintenanceStatus::Completed | MaintenanceStatus::Cancelled)
    }
}

fn default_make() -> String {
    "Massey Ferguson".to_string()
}

fn default_baseline_status() -> String {
    "pending".to_string()
}

/// A tractor as returned by `GET /tractors/`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tractor {
    /// Server document id.
    #[serde(default)]
    pub id: String,
    /// Owner-facing code, always uppercase. Used as the REST path key.
    pub tractor_id: String,
    pub model: String,
    #[serde(default = "default_make")]
    pub make: String,
    #[serde(default)]
    pub engine_hours: f64,
    #[serde(default)]
    pub usage_intensity: UsageIntensity,
    #[serde(default)]
    pub health_status: HealthStatus,
    #[serde(default = "default_baseline_status")]
    pub baseline_status: String,
    #[serde(default, with = "crate::timestamp::option")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A maintenance task attached to a tractor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceTask {
    pub id: String,
    pub tractor_id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub task_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, with = "crate::timestamp::option")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due_at_hours: Option<f64>,
    #[serde(default)]
    pub priority: MaintenancePriority,
    #[serde(default)]
    pub status: MaintenanceStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub estimated_cost: Option<f64>,
    #[serde(default, with = "crate::timestamp::option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now", with = "crate::timestamp")]
    pub created_at: DateTime<Utc>,
}

/// One day's usage entry for a tractor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: String,
    pub tractor_id: String,
    #[serde(with = "crate::timestamp")]
    pub date: DateTime<Utc>,
    pub start_hours: f64,
    pub end_hours: f64,
    pub hours_used: f64,
    #[serde(default)]
    pub notes: Option<String>,
}
