//! Online/offline tracking.
//!
//! The host reports reachability (OS signal, probe, or both). Only edges are
//! published, so a flapping source that repeats the same state does not wake
//! subscribers.

use crate::task::BackgroundTask;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// A change in connectivity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectivityEvent {
    pub online: bool,
    pub at: DateTime<Utc>,
}

/// Something that can tell whether the API is reachable right now.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Current online state plus an edge-triggered event stream.
pub struct ConnectivityMonitor {
    online: Mutex<bool>,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            online: Mutex::new(initially_online),
            events,
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Records the latest observation. Returns true if the state changed.
    pub fn report(&self, online: bool) -> bool {
        let mut state = self.online.lock().unwrap_or_else(|p| p.into_inner());
        if *state == online {
            return false;
        }
        *state = online;
        if online {
            info!("connectivity restored");
        } else {
            info!("connectivity lost");
        }
        // Sent under the lock so subscribers see edges in order.
        let _ = self.events.send(ConnectivityEvent {
            online,
            at: Utc::now(),
        });
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    /// Polls `probe` every `interval` and reports the result until stopped.
    pub fn spawn_watch(
        self: &Arc<Self>,
        probe: Arc<dyn ReachabilityProbe>,
        interval: Duration,
    ) -> BackgroundTask {
        let monitor = Arc::clone(self);
        BackgroundTask::spawn(move |mut shutdown| async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let online = probe.probe().await;
                        monitor.report(online);
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("connectivity watch stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}
