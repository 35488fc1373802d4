//! Offline mutation queue and synchronization engine for TractorCare.
//!
//! User intents (usage logs, maintenance edits, tractor edits) are queued
//! durably, applied optimistically to an in-memory projection, and delivered
//! to the remote API whenever connectivity returns or a manual sync is
//! requested.
//!
//! # Components
//!
//! - [`MutationQueue`]: ordered pending mutations backed by a `DurableStore`
//! - [`Synchronizer`]: drains the queue through a [`RemoteGateway`], one pass
//!   at a time, coalescing concurrent triggers
//! - [`ConnectivityMonitor`]: online/offline signal with edge notifications
//! - [`Projection`]: authoritative entities merged with pending overlays
//! - [`SyncEngine`]: the facade the presentation layer talks to

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod projection;
pub mod queue;
pub mod synchronizer;
pub mod task;

pub use config::SyncConfig;
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor, ReachabilityProbe};
pub use engine::{NewMaintenanceTask, RefreshSource, SyncEngine};
pub use error::{GatewayError, GatewayResult, SyncError, SyncResult};
pub use gateway::{RemoteEntity, RemoteGateway};
pub use projection::{MaintenanceView, MergedView, Projection, ProjectionBase, TractorView, UsageView};
pub use queue::{MutationQueue, QueueEvent, Settlement};
pub use synchronizer::{DrainReport, DrainTrigger, SyncEvent, SyncState, SyncTally, Synchronizer};
pub use task::BackgroundTask;

/// Installs a stderr `tracing` subscriber filtered by `RUST_LOG`
/// (default `info`). Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
