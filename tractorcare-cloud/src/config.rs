//! Gateway configuration.

use crate::error::{CloudError, CloudResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the HTTP gateway and reachability probe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL for the TractorCare API (e.g., "https://api.tractorcare.app").
    pub api_base_url: String,

    /// Client-side request timeout (seconds).
    pub request_timeout_secs: u64,

    /// Path probed to decide whether the API is reachable.
    pub health_path: String,

    /// How often the reachability probe runs (seconds).
    pub probe_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.tractorcare.app".to_string(),
            request_timeout_secs: 15,
            health_path: "/health".to_string(),
            probe_interval_secs: 10,
        }
    }
}

impl GatewayConfig {
    /// Creates a config pointing at a local or mock server.
    pub fn for_base_url(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    /// The base URL without a trailing slash.
    pub(crate) fn base(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
    }

    pub(crate) fn health_url(&self) -> String {
        let path = self.health_path.trim_start_matches('/');
        format!("{}/{path}", self.base())
    }

    pub fn validate(&self) -> CloudResult<()> {
        let url = reqwest::Url::parse(&self.api_base_url)
            .map_err(|e| CloudError::Config(format!("api_base_url: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CloudError::Config(format!(
                "api_base_url must be http or https, got {}",
                url.scheme()
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(CloudError::Config(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        if self.probe_interval_secs == 0 {
            return Err(CloudError::Config(
                "probe_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
