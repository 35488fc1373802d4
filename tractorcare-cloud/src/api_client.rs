//! HTTP client for the TractorCare REST API.
//!
//! Bearer-token authenticated. Every response is mapped onto a
//! [`GatewayError`] so the synchronizer can decide whether to retry, surface
//! or halt.

use crate::config::GatewayConfig;
use crate::error::CloudResult;
use crate::probe::HttpReachabilityProbe;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use tractorcare_sync::{GatewayError, GatewayResult, RemoteGateway};
use tractorcare_types::{
    HealthStatus, MaintenanceCreatePayload, MaintenancePriority, MaintenanceStatus,
    MaintenanceTask, MaintenanceUpdatePayload, Tractor, TractorUpdatePayload, UsageIntensity,
    UsageLogPayload, UsageRecord,
};

/// `POST /usage/{tractor_id}/log` body.
#[derive(Serialize)]
struct UsageLogBody<'a> {
    end_hours: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<&'a str>,
}

#[derive(Serialize)]
struct MaintenanceCreateBody<'a> {
    #[serde(rename = "type")]
    task_type: &'a str,
    task_name: &'a str,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    due_date: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    due_at_hours: Option<f64>,
    priority: MaintenancePriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    estimated_cost: Option<f64>,
}

#[derive(Serialize)]
struct MaintenanceUpdateBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<MaintenanceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    due_date: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    due_at_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<MaintenancePriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Mirrors the API's `TractorUpdate`.
#[derive(Serialize)]
struct TractorUpdateBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    engine_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage_intensity: Option<UsageIntensity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    health_status: Option<HealthStatus>,
}

/// HTTP implementation of [`RemoteGateway`].
pub struct HttpGateway {
    client: Client,
    config: GatewayConfig,
    token: Arc<RwLock<Option<String>>>,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> CloudResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            config,
            token: Arc::new(RwLock::new(None)),
        })
    }

    /// Sets the bearer token (after login, or when restoring a session).
    pub async fn set_token(&self, token: impl Into<String>) {
        *self.token.write().await = Some(token.into());
    }

    pub async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }

    pub async fn logout(&self) {
        *self.token.write().await = None;
    }

    /// A reachability probe sharing this gateway's connection pool.
    pub fn probe(&self) -> HttpReachabilityProbe {
        HttpReachabilityProbe::with_client(self.client.clone(), &self.config)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base())
    }

    /// Requests without a token go out anyway; the server answers 401 and
    /// that is classified like any other rejection of credentials.
    async fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token.read().await.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> GatewayResult<T> {
        let response = self
            .authorized(request)
            .await
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    // ── Usage ──

    async fn post_usage_log(&self, payload: &UsageLogPayload) -> GatewayResult<UsageRecord> {
        let url = self.url(&format!("/usage/{}/log", payload.tractor_id));
        debug!("POST {url}");
        let body = UsageLogBody {
            end_hours: payload.end_hours,
            notes: payload.notes.as_deref(),
        };
        self.send(self.client.post(&url).json(&body)).await
    }

    async fn get_usage_history(&self, tractor_id: &str, days: u32) -> GatewayResult<Vec<UsageRecord>> {
        let url = self.url(&format!("/usage/{tractor_id}/history"));
        debug!("GET {url}?days={days}");
        self.send(self.client.get(&url).query(&[("days", days)]))
            .await
    }

    // ── Maintenance ──

    async fn post_maintenance(
        &self,
        payload: &MaintenanceCreatePayload,
    ) -> GatewayResult<MaintenanceTask> {
        let url = self.url(&format!("/maintenance/{}/tasks", payload.tractor_id));
        debug!("POST {url}");
        let body = MaintenanceCreateBody {
            task_type: &payload.task_type,
            task_name: &payload.task_name,
            description: &payload.description,
            due_date: payload.due_date,
            due_at_hours: payload.due_at_hours,
            priority: payload.priority,
            notes: payload.notes.as_deref(),
            estimated_cost: payload.estimated_cost,
        };
        self.send(self.client.post(&url).json(&body)).await
    }

    async fn put_maintenance(
        &self,
        payload: &MaintenanceUpdatePayload,
    ) -> GatewayResult<MaintenanceTask> {
        let url = self.url(&format!("/maintenance/tasks/{}", payload.task_id));
        debug!("PUT {url}");
        let body = MaintenanceUpdateBody {
            status: payload.status,
            due_date: payload.due_date,
            due_at_hours: payload.due_at_hours,
            priority: payload.priority,
            notes: payload.notes.as_deref(),
            completed_at: payload.completed_at,
        };
        self.send(self.client.put(&url).json(&body)).await
    }

    async fn get_maintenance(&self, tractor_id: &str) -> GatewayResult<Vec<MaintenanceTask>> {
        let url = self.url(&format!("/maintenance/{tractor_id}/tasks"));
        debug!("GET {url}");
        self.send(self.client.get(&url)).await
    }

    // ── Tractors ──

    async fn get_tractors(&self) -> GatewayResult<Vec<Tractor>> {
        let url = self.url("/tractors/");
        debug!("GET {url}");
        self.send(self.client.get(&url)).await
    }

    async fn put_tractor(&self, payload: &TractorUpdatePayload) -> GatewayResult<Tractor> {
        let url = self.url(&format!("/tractors/{}", payload.tractor_id));
        debug!("PUT {url}");
        let body = TractorUpdateBody {
            engine_hours: payload.engine_hours,
            usage_intensity: payload.usage_intensity,
            health_status: payload.health_status,
        };
        self.send(self.client.put(&url).json(&body)).await
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn create_usage_log(&self, payload: &UsageLogPayload) -> GatewayResult<UsageRecord> {
        self.post_usage_log(payload).await
    }

    async fn create_maintenance(
        &self,
        payload: &MaintenanceCreatePayload,
    ) -> GatewayResult<MaintenanceTask> {
        self.post_maintenance(payload).await
    }

    async fn update_maintenance(
        &self,
        payload: &MaintenanceUpdatePayload,
    ) -> GatewayResult<MaintenanceTask> {
        self.put_maintenance(payload).await
    }

    async fn update_tractor(&self, payload: &TractorUpdatePayload) -> GatewayResult<Tractor> {
        self.put_tractor(payload).await
    }

    async fn fetch_tractors(&self) -> GatewayResult<Vec<Tractor>> {
        self.get_tractors().await
    }

    async fn fetch_maintenance(&self, tractor_id: &str) -> GatewayResult<Vec<MaintenanceTask>> {
        self.get_maintenance(tractor_id).await
    }

    async fn fetch_usage_history(
        &self,
        tractor_id: &str,
        days: u32,
    ) -> GatewayResult<Vec<UsageRecord>> {
        self.get_usage_history(tractor_id, days).await
    }
}

pub(crate) fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Network(err.to_string())
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> GatewayResult<T> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(GatewayError::Unauthorized);
    }

    let body = response.bytes().await.map_err(transport_error)?;
    if !status.is_success() {
        return Err(GatewayError::Server {
            status: status.as_u16(),
            message: error_message(status, &body),
        });
    }

    serde_json::from_slice(&body).map_err(|e| GatewayError::Undecodable {
        status: status.as_u16(),
        message: e.to_string(),
    })
}

/// FastAPI puts the reason in `detail`, either a string or a list of
/// validation errors.
fn error_message(status: StatusCode, body: &[u8]) -> String {
    let detail = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("detail").cloned());
    match detail {
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => {
            let text = String::from_utf8_lossy(body).trim().to_string();
            if text.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                text
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_string_is_used_verbatim() {
        let body = br#"{"detail":"Tractor not found"}"#;
        assert_eq!(
            error_message(StatusCode::NOT_FOUND, body),
            "Tractor not found"
        );
    }

    #[test]
    fn validation_detail_is_flattened_to_json() {
        let body = br#"{"detail":[{"loc":["body","end_hours"],"msg":"field required"}]}"#;
        let message = error_message(StatusCode::UNPROCESSABLE_ENTITY, body);
        assert!(message.contains("field required"));
    }

    #[test]
    fn empty_body_falls_back_to_reason_phrase() {
        assert_eq!(
            error_message(StatusCode::SERVICE_UNAVAILABLE, b""),
            "Service Unavailable"
        );
    }

    #[test]
    fn plain_text_body_is_kept() {
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, b"upstream down\n"),
            "upstream down"
        );
    }
}
