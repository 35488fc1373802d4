//! Core types for the TractorCare offline sync engine.
//!
//! This crate defines the fundamental data structures shared by the
//! storage, sync and cloud crates:
//! - Domain entities mirrored from the remote API (tractors, maintenance
//!   tasks, usage records)
//! - Typed mutation payloads and the queued `PendingMutation` envelope
//! - Derived maintenance health for a tractor

mod entity;
mod health;
mod id;
mod mutation;
mod timestamp;

pub use entity::{
    HealthStatus, MaintenancePriority, MaintenanceStatus, MaintenanceTask, Tractor, UsageIntensity,
    UsageRecord,
};
pub use health::{maintenance_outlook, MaintenanceOutlook, DUE_SOON_DAYS, DUE_SOON_HOURS};
pub use id::{is_provisional, MutationId, PROVISIONAL_PREFIX};
pub use timestamp::parse_utc;
pub use mutation::{
    Bucket, DeliveryFailure, FailureClass, MaintenanceCreatePayload, MaintenanceUpdatePayload,
    MutationKind, MutationPayload, PendingMutation, TractorUpdatePayload, UsageLogPayload,
};
