//! Reachability probe backed by the API health endpoint.

use crate::config::GatewayConfig;
use crate::error::CloudResult;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use tractorcare_sync::{BackgroundTask, ConnectivityMonitor, ReachabilityProbe};
use tracing::debug;

/// Reports the API reachable when `GET {health_path}` answers 2xx.
pub struct HttpReachabilityProbe {
    client: Client,
    url: String,
}

impl HttpReachabilityProbe {
    pub fn new(config: &GatewayConfig) -> CloudResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub(crate) fn with_client(client: Client, config: &GatewayConfig) -> Self {
        Self {
            client,
            url: config.health_url(),
        }
    }

    /// Starts polling on `config.probe_interval()`, feeding `monitor`.
    pub fn spawn(
        self,
        monitor: &Arc<ConnectivityMonitor>,
        config: &GatewayConfig,
    ) -> BackgroundTask {
        monitor.spawn_watch(Arc::new(self), config.probe_interval())
    }
}

#[async_trait]
impl ReachabilityProbe for HttpReachabilityProbe {
    async fn probe(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("health probe failed: {e}");
                false
            }
        }
    }
}
