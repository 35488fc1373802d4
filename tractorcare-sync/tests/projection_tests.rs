mod support;

use chrono::Utc;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use support::{tractor, usage};
use tractorcare_sync::projection::merge;
use tractorcare_sync::{Projection, ProjectionBase, RemoteEntity};
use tractorcare_types::{
    HealthStatus, MaintenanceCreatePayload, MaintenancePriority, MaintenanceStatus,
    MaintenanceTask, MaintenanceUpdatePayload, MutationId, MutationPayload, PendingMutation,
    TractorUpdatePayload, UsageRecord,
};

fn pending(seq: u64, payload: MutationPayload) -> PendingMutation {
    PendingMutation::new(MutationId::new(), seq, payload)
}

fn add_hours(seq: u64, end_hours: f64, hours_used: f64) -> PendingMutation {
    pending(
        seq,
        MutationPayload::UsageLog(usage("MF-001", end_hours, hours_used, "ploughing")),
    )
}

fn projection_with(engine_hours: f64) -> Projection {
    let projection = Projection::default();
    projection.replace_tractors(vec![tractor("MF-001", engine_hours)]);
    projection
}

fn server_task(id: &str, due_at_hours: Option<f64>) -> MaintenanceTask {
    MaintenanceTask {
        id: id.to_string(),
        tractor_id: "MF-001".to_string(),
        task_type: "oil_change".to_string(),
        task_name: "Engine oil change".to_string(),
        description: String::new(),
        due_date: None,
        due_at_hours,
        priority: MaintenancePriority::Medium,
        status: MaintenanceStatus::Pending,
        notes: None,
        estimated_cost: None,
        completed_at: None,
        created_at: Utc::now(),
    }
}

fn create(seq: u64, provisional_id: &str) -> PendingMutation {
    pending(
        seq,
        MutationPayload::MaintenanceCreate(MaintenanceCreatePayload {
            tractor_id: "MF-001".to_string(),
            provisional_id: provisional_id.to_string(),
            task_type: "filter".to_string(),
            task_name: "Air filter".to_string(),
            description: "Replace the primary element".to_string(),
            due_date: None,
            due_at_hours: Some(200.0),
            priority: MaintenancePriority::High,
            notes: None,
            estimated_cost: Some(25.0),
        }),
    )
}

fn annotate(seq: u64, task_id: &str, notes: &str) -> PendingMutation {
    pending(
        seq,
        MutationPayload::MaintenanceUpdate(MaintenanceUpdatePayload {
            task_id: task_id.to_string(),
            tractor_id: "MF-001".to_string(),
            notes: Some(notes.to_string()),
            ..Default::default()
        }),
    )
}

// ── Optimistic overlays ─────────────────────────────────────────

#[test]
fn usage_log_is_visible_before_any_network_call() {
    let projection = projection_with(100.0);

    projection.apply_optimistic(add_hours(1, 105.0, 5.0));

    let view = projection.tractor("MF-001").unwrap();
    assert_eq!(view.tractor.engine_hours, 105.0);
    assert!(view.pending_fields.contains("engine_hours"));
    assert_eq!(view.pending_mutations, 1);
}

#[test]
fn pending_usage_appears_in_history() {
    let projection = projection_with(100.0);
    projection.apply_optimistic(add_hours(1, 105.0, 5.0));

    let history = projection.usage_for("MF-001");

    assert_eq!(history.len(), 1);
    assert!(history[0].pending);
    assert_eq!(history[0].record.start_hours, 100.0);
    assert_eq!(history[0].record.end_hours, 105.0);
    assert!(history[0].record.id.starts_with("local-"));
}

#[test]
fn new_task_shows_under_its_provisional_id() {
    let projection = projection_with(100.0);
    projection.apply_optimistic(create(1, "local-1"));

    let tasks = projection.maintenance_for("MF-001");

    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].provisional);
    assert_eq!(tasks[0].task.id, "local-1");
    assert_eq!(tasks[0].task.status, MaintenanceStatus::Pending);
}

#[test]
fn maintenance_update_marks_changed_fields() {
    let projection = projection_with(100.0);
    projection.replace_maintenance("MF-001", vec![server_task("task-1", Some(250.0))]);
    projection.apply_optimistic(pending(
        1,
        MutationPayload::MaintenanceUpdate(MaintenanceUpdatePayload {
            task_id: "task-1".to_string(),
            tractor_id: "MF-001".to_string(),
            status: Some(MaintenanceStatus::Completed),
            notes: Some("done".to_string()),
            ..Default::default()
        }),
    ));

    let task = &projection.maintenance_for("MF-001")[0];

    assert_eq!(task.task.status, MaintenanceStatus::Completed);
    assert_eq!(
        task.pending_fields.iter().copied().collect::<Vec<_>>(),
        vec!["notes", "status"]
    );
    assert!(!task.provisional);
}

#[test]
fn tractor_edit_shadows_only_the_fields_it_sets() {
    let projection = projection_with(100.0);
    projection.apply_optimistic(pending(
        1,
        MutationPayload::TractorFieldUpdate(TractorUpdatePayload {
            tractor_id: "MF-001".to_string(),
            health_status: Some(HealthStatus::Poor),
            ..Default::default()
        }),
    ));

    let view = projection.tractor("MF-001").unwrap();

    assert_eq!(view.tractor.health_status, HealthStatus::Poor);
    assert_eq!(view.tractor.engine_hours, 100.0);
    assert_eq!(
        view.pending_fields.iter().copied().collect::<Vec<_>>(),
        vec!["health_status"]
    );
}

#[test]
fn overlay_for_unknown_tractor_is_ignored() {
    let projection = projection_with(100.0);
    projection.apply_optimistic(pending(
        1,
        MutationPayload::UsageLog(usage("MF-999", 10.0, 2.0, "")),
    ));

    assert_eq!(projection.tractors().len(), 1);
    assert_eq!(projection.tractor("MF-001").unwrap().pending_mutations, 0);
}

#[test]
fn dropping_an_overlay_reverts_the_view() {
    let projection = projection_with(100.0);
    let mutation = add_hours(1, 105.0, 5.0);
    projection.apply_optimistic(mutation.clone());

    assert!(projection.drop_overlay(mutation.id));
    assert!(!projection.drop_overlay(mutation.id));
    assert_eq!(projection.tractor("MF-001").unwrap().tractor.engine_hours, 100.0);
}

#[test]
fn reapplying_the_same_mutation_does_not_double_count() {
    let projection = projection_with(100.0);
    let mutation = add_hours(1, 105.0, 5.0);
    projection.apply_optimistic(mutation.clone());
    projection.apply_optimistic(mutation);

    assert_eq!(projection.overlay_count(), 1);
    assert_eq!(projection.usage_for("MF-001").len(), 1);
}

// ── Refresh & confirmation ──────────────────────────────────────

#[test]
fn refresh_keeps_in_flight_edits_visible() {
    let projection = projection_with(100.0);
    projection.apply_optimistic(add_hours(1, 105.0, 5.0));

    let mut refreshed = tractor("MF-001", 100.0);
    refreshed.model = "MF 390".to_string();
    projection.replace_tractors(vec![refreshed]);

    let view = projection.tractor("MF-001").unwrap();
    assert_eq!(view.tractor.model, "MF 390");
    assert_eq!(view.tractor.engine_hours, 105.0);
}

#[test]
fn server_value_wins_on_confirmation() {
    let projection = projection_with(100.0);
    let edit = pending(
        1,
        MutationPayload::TractorFieldUpdate(TractorUpdatePayload {
            tractor_id: "MF-001".to_string(),
            engine_hours: Some(150.0),
            ..Default::default()
        }),
    );
    projection.apply_optimistic(edit.clone());

    projection.confirm(edit.id, RemoteEntity::Tractor(tractor("MF-001", 149.5)));

    let view = projection.tractor("MF-001").unwrap();
    assert_eq!(view.tractor.engine_hours, 149.5);
    assert!(view.pending_fields.is_empty());
    assert_eq!(projection.overlay_count(), 0);
}

#[test]
fn confirmed_usage_raises_base_hours() {
    let projection = projection_with(100.0);
    let log = add_hours(1, 105.0, 5.0);
    projection.apply_optimistic(log.clone());

    projection.confirm(
        log.id,
        RemoteEntity::UsageRecord(UsageRecord {
            id: "usage-1".to_string(),
            tractor_id: "MF-001".to_string(),
            date: Utc::now(),
            start_hours: 100.0,
            end_hours: 105.0,
            hours_used: 5.0,
            notes: None,
        }),
    );

    assert_eq!(projection.base().tractors["MF-001"].engine_hours, 105.0);
    let history = projection.usage_for("MF-001");
    assert_eq!(history.len(), 1);
    assert!(!history[0].pending);
}

#[test]
fn confirmed_create_moves_updates_to_server_id() {
    let projection = projection_with(100.0);
    let new_task = create(1, "local-7");
    projection.apply_optimistic(new_task.clone());
    projection.apply_optimistic(annotate(2, "local-7", "check seals"));

    projection.confirm(
        new_task.id,
        RemoteEntity::MaintenanceTask(server_task("task-7", Some(200.0))),
    );

    let tasks = projection.maintenance_for("MF-001");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task.id, "task-7");
    assert!(!tasks[0].provisional);
    assert_eq!(tasks[0].task.notes.as_deref(), Some("check seals"));
    assert!(tasks[0].pending_fields.contains("notes"));
}

#[test]
fn replacing_one_tractors_tasks_leaves_others() {
    let projection = Projection::new(ProjectionBase::default());
    let mut other = server_task("task-2", None);
    other.tractor_id = "MF-002".to_string();
    projection.replace_maintenance("MF-002", vec![other]);
    projection.replace_maintenance("MF-001", vec![server_task("task-1", None)]);

    projection.replace_maintenance("MF-001", Vec::new());

    assert_eq!(projection.base().maintenance.len(), 1);
    assert!(projection.base().maintenance.contains_key("task-2"));
}

// ── Outlook ─────────────────────────────────────────────────────

#[test]
fn outlook_uses_merged_engine_hours() {
    let projection = projection_with(100.0);
    projection.replace_maintenance("MF-001", vec![server_task("task-1", Some(104.0))]);

    let before = projection.outlook("MF-001", Utc::now()).unwrap();
    assert_eq!(before.overdue, 0);
    assert_eq!(before.due_soon, 1);

    projection.apply_optimistic(add_hours(1, 105.0, 5.0));
    let after = projection.outlook("MF-001", Utc::now()).unwrap();
    assert_eq!(after.overdue, 1);
    assert_eq!(after.health_score, 95.0);
    assert_eq!(after.health_status, HealthStatus::Excellent);
}

#[test]
fn outlook_for_unknown_tractor_is_none() {
    let projection = projection_with(100.0);
    assert!(projection.outlook("MF-404", Utc::now()).is_none());
}

// ── Properties ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn merged_hours_are_max_of_base_and_logged_end(
        base_hours in 0u32..1000,
        ends in prop::collection::vec(0u32..2000, 0..8),
    ) {
        let mut base = ProjectionBase::default();
        base.tractors.insert("MF-001".to_string(), tractor("MF-001", f64::from(base_hours)));
        let overlays: Vec<_> = ends
            .iter()
            .enumerate()
            .map(|(i, end)| add_hours(i as u64 + 1, f64::from(*end), 1.0))
            .collect();

        let merged = merge(&base, &overlays);

        let expected = ends.iter().copied().chain([base_hours]).max().unwrap();
        prop_assert_eq!(merged.tractors["MF-001"].tractor.engine_hours, f64::from(expected));
        prop_assert_eq!(merged.usage.len(), ends.len());
        prop_assert_eq!(merge(&base, &overlays), merged);
    }
}
