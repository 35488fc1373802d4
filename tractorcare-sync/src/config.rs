//! Sync engine configuration.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the sync engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Per-call timeout for gateway requests (seconds). A timeout counts as
    /// a transient failure.
    pub request_timeout_secs: u64,

    /// Start a drain right after an enqueue when online.
    pub attempt_on_enqueue: bool,

    /// Re-fetch tractors after a pass that confirmed anything.
    pub refresh_after_drain: bool,

    /// Buffer size of the queue and sync event channels.
    pub event_capacity: usize,

    /// How many days of usage history a refresh pulls per tractor.
    pub usage_history_days: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            attempt_on_enqueue: true,
            refresh_after_drain: true,
            event_capacity: 128,
            usage_history_days: 30,
        }
    }
}

impl SyncConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.request_timeout_secs == 0 {
            return Err(SyncError::InvalidInput(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(SyncError::InvalidInput(
                "event_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
