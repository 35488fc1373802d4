//! Remote gateway boundary.
//!
//! The engine never talks HTTP itself. It calls a [`RemoteGateway`] and gets
//! back either the authoritative entity or a classified [`GatewayError`].

use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use std::time::Duration;
use tractorcare_types::{
    MaintenanceCreatePayload, MaintenanceTask, MaintenanceUpdatePayload, MutationPayload, Tractor,
    TractorUpdatePayload, UsageLogPayload, UsageRecord,
};

/// Typed operations against the TractorCare API.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn create_usage_log(&self, payload: &UsageLogPayload) -> GatewayResult<UsageRecord>;

    async fn create_maintenance(
        &self,
        payload: &MaintenanceCreatePayload,
    ) -> GatewayResult<MaintenanceTask>;

    async fn update_maintenance(
        &self,
        payload: &MaintenanceUpdatePayload,
    ) -> GatewayResult<MaintenanceTask>;

    async fn update_tractor(&self, payload: &TractorUpdatePayload) -> GatewayResult<Tractor>;

    async fn fetch_tractors(&self) -> GatewayResult<Vec<Tractor>>;

    async fn fetch_maintenance(&self, tractor_id: &str) -> GatewayResult<Vec<MaintenanceTask>>;

    async fn fetch_usage_history(
        &self,
        tractor_id: &str,
        days: u32,
    ) -> GatewayResult<Vec<UsageRecord>>;
}

/// The server's answer to a delivered mutation.
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteEntity {
    UsageRecord(UsageRecord),
    MaintenanceTask(MaintenanceTask),
    Tractor(Tractor),
}

/// Sends one payload to the matching gateway operation, bounded by `timeout`.
pub async fn deliver(
    gateway: &dyn RemoteGateway,
    payload: &MutationPayload,
    timeout: Duration,
) -> GatewayResult<RemoteEntity> {
    let call = async {
        match payload {
            MutationPayload::UsageLog(p) => gateway
                .create_usage_log(p)
                .await
                .map(RemoteEntity::UsageRecord),
            MutationPayload::MaintenanceCreate(p) => gateway
                .create_maintenance(p)
                .await
                .map(RemoteEntity::MaintenanceTask),
            MutationPayload::MaintenanceUpdate(p) => gateway
                .update_maintenance(p)
                .await
                .map(RemoteEntity::MaintenanceTask),
            MutationPayload::TractorFieldUpdate(p) => {
                gateway.update_tractor(p).await.map(RemoteEntity::Tractor)
            }
        }
    };
    with_timeout(timeout, call).await
}

/// Bounds any gateway future by `timeout`, mapping expiry to `Timeout`.
pub async fn with_timeout<T>(
    timeout: Duration,
    call: impl std::future::Future<Output = GatewayResult<T>>,
) -> GatewayResult<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout),
    }
}
