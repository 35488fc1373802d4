//! Derived maintenance health for a tractor.

use crate::entity::{HealthStatus, MaintenancePriority, MaintenanceTask, Tractor};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A task within this many engine hours of its due point is due soon.
pub const DUE_SOON_HOURS: f64 = 10.0;
/// A task within this many days of its due date is due soon.
pub const DUE_SOON_DAYS: i64 = 7;

/// Summary of a tractor's open maintenance at a point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceOutlook {
    pub tractor_id: String,
    pub overdue: usize,
    pub due_soon: usize,
    pub health_score: f64,
    pub health_status: HealthStatus,
}

/// Classifies open tasks against the tractor's engine hours and `now`.
///
/// Closed tasks and tasks for other tractors are ignored.
pub fn maintenance_outlook(
    tractor: &Tractor,
    tasks: &[MaintenanceTask],
    now: DateTime<Utc>,
) -> MaintenanceOutlook {
    let mut overdue = 0;
    let mut due_soon = 0;
    let mut score: f64 = 100.0;

    for task in tasks
        .iter()
        .filter(|t| t.tractor_id == tractor.tractor_id && !t.status.is_closed())
    {
        if is_overdue(task, tractor.engine_hours, now) {
            overdue += 1;
            score -= match task.priority {
                MaintenancePriority::Critical => 20.0,
                MaintenancePriority::High => 10.0,
                _ => 5.0,
            };
        } else if is_due_soon(task, tractor.engine_hours, now) {
            due_soon += 1;
        }
    }

    let health_score = score.max(0.0);
    MaintenanceOutlook {
        tractor_id: tractor.tractor_id.clone(),
        overdue,
        due_soon,
        health_score,
        health_status: HealthStatus::from_score(health_score),
    }
}

fn is_overdue(task: &MaintenanceTask, engine_hours: f64, now: DateTime<Utc>) -> bool {
    task.due_at_hours.is_some_and(|h| h <= engine_hours) || task.due_date.is_some_and(|d| d < now)
}

fn is_due_soon(task: &MaintenanceTask, engine_hours: f64, now: DateTime<Utc>) -> bool {
    task.due_at_hours
        .is_some_and(|h| h - engine_hours <= DUE_SOON_HOURS)
        || task
            .due_date
            .is_some_and(|d| d - now <= Duration::days(DUE_SOON_DAYS))
}
