//! Shared helpers: an in-process fake of the TractorCare API.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify, Semaphore};
use tractorcare_storage::{DurableStore, MemoryStore};
use tractorcare_sync::{
    ConnectivityMonitor, DrainReport, GatewayError, GatewayResult, RemoteGateway, SyncConfig,
    SyncEngine, SyncEvent,
};
use tractorcare_types::{
    HealthStatus, MaintenanceCreatePayload, MaintenanceStatus, MaintenanceTask,
    MaintenanceUpdatePayload, Tractor, TractorUpdatePayload, UsageIntensity, UsageLogPayload,
    UsageRecord,
};

// ── Fake gateway ────────────────────────────────────────────────

/// A request the fake received.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    UsageLog(UsageLogPayload),
    CreateMaintenance(MaintenanceCreatePayload),
    UpdateMaintenance(MaintenanceUpdatePayload),
    UpdateTractor(TractorUpdatePayload),
    FetchTractors,
    FetchMaintenance(String),
    FetchUsage(String),
}

impl Call {
    pub fn is_delivery(&self) -> bool {
        matches!(
            self,
            Call::UsageLog(_)
                | Call::CreateMaintenance(_)
                | Call::UpdateMaintenance(_)
                | Call::UpdateTractor(_)
        )
    }
}

type FailRule = Box<dyn Fn(&Call) -> Option<GatewayError> + Send + Sync>;

#[derive(Default)]
struct ServerState {
    tractors: BTreeMap<String, Tractor>,
    tasks: BTreeMap<String, MaintenanceTask>,
    usage: Vec<UsageRecord>,
    next_id: u64,
}

impl ServerState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<ServerState>,
    calls: Mutex<Vec<Call>>,
    rule: Mutex<Option<FailRule>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    entered: Notify,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_tractors(tractors: Vec<Tractor>) -> Arc<Self> {
        let gateway = Self::default();
        {
            let mut state = gateway.state.lock().unwrap();
            for t in tractors {
                state.tractors.insert(t.tractor_id.clone(), t);
            }
        }
        Arc::new(gateway)
    }

    /// Fails every call for which `rule` returns an error.
    pub fn fail_when<F>(&self, rule: F)
    where
        F: Fn(&Call) -> Option<GatewayError> + Send + Sync + 'static,
    {
        *self.rule.lock().unwrap() = Some(Box::new(rule));
    }

    pub fn succeed_all(&self) {
        *self.rule.lock().unwrap() = None;
    }

    /// Blocks deliveries until [`FakeGateway::release`].
    pub fn hold(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.close();
        }
    }

    /// Waits until a delivery has started.
    pub async fn wait_entered(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.entered.notified())
            .await
            .expect("no delivery started");
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn deliveries(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_delivery).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn server_tractor(&self, tractor_id: &str) -> Option<Tractor> {
        self.state.lock().unwrap().tractors.get(tractor_id).cloned()
    }

    pub fn server_tasks(&self) -> Vec<MaintenanceTask> {
        self.state.lock().unwrap().tasks.values().cloned().collect()
    }

    /// Overwrites server state directly, as another device would.
    pub fn set_server_tractor(&self, tractor: Tractor) {
        self.state
            .lock()
            .unwrap()
            .tractors
            .insert(tractor.tractor_id.clone(), tractor);
    }

    async fn begin(&self, call: Call) -> GatewayResult<()> {
        let delivery = call.is_delivery();
        self.calls.lock().unwrap().push(call.clone());
        let failure = self.rule.lock().unwrap().as_ref().and_then(|rule| rule(&call));

        if delivery {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.entered.notify_one();
            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                let _ = gate.acquire().await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn not_found(what: &str) -> GatewayError {
    GatewayError::Server {
        status: 404,
        message: format!("{what} not found"),
    }
}

#[async_trait]
impl RemoteGateway for FakeGateway {
    async fn create_usage_log(&self, payload: &UsageLogPayload) -> GatewayResult<UsageRecord> {
        self.begin(Call::UsageLog(payload.clone())).await?;
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("usage");
        let tractor = state
            .tractors
            .get_mut(&payload.tractor_id)
            .ok_or_else(|| not_found("Tractor"))?;
        if payload.end_hours < tractor.engine_hours {
            return Err(GatewayError::Server {
                status: 400,
                message: "End hours must not be lower than current engine hours".to_string(),
            });
        }
        let start_hours = tractor.engine_hours;
        tractor.engine_hours = payload.end_hours;
        let record = UsageRecord {
            id,
            tractor_id: payload.tractor_id.clone(),
            date: payload.logged_at,
            start_hours,
            end_hours: payload.end_hours,
            hours_used: payload.end_hours - start_hours,
            notes: payload.notes.clone(),
        };
        state.usage.push(record.clone());
        Ok(record)
    }

    async fn create_maintenance(
        &self,
        payload: &MaintenanceCreatePayload,
    ) -> GatewayResult<MaintenanceTask> {
        self.begin(Call::CreateMaintenance(payload.clone())).await?;
        let mut state = self.state.lock().unwrap();
        if !state.tractors.contains_key(&payload.tractor_id) {
            return Err(not_found("Tractor"));
        }
        let task = MaintenanceTask {
            id: state.next_id("task"),
            tractor_id: payload.tractor_id.clone(),
            task_type: payload.task_type.clone(),
            task_name: payload.task_name.clone(),
            description: payload.description.clone(),
            due_date: payload.due_date,
            due_at_hours: payload.due_at_hours,
            priority: payload.priority,
            status: MaintenanceStatus::Pending,
            notes: payload.notes.clone(),
            estimated_cost: payload.estimated_cost,
            completed_at: None,
            created_at: Utc::now(),
        };
        state.tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn update_maintenance(
        &self,
        payload: &MaintenanceUpdatePayload,
    ) -> GatewayResult<MaintenanceTask> {
        self.begin(Call::UpdateMaintenance(payload.clone())).await?;
        let mut state = self.state.lock().unwrap();
        let task = state
            .tasks
            .get_mut(&payload.task_id)
            .ok_or_else(|| not_found("Task"))?;
        if let Some(status) = payload.status {
            task.status = status;
        }
        if let Some(notes) = &payload.notes {
            task.notes = Some(notes.clone());
        }
        if let Some(completed_at) = payload.completed_at {
            task.completed_at = Some(completed_at);
        }
        if let Some(priority) = payload.priority {
            task.priority = priority;
        }
        Ok(task.clone())
    }

    async fn update_tractor(&self, payload: &TractorUpdatePayload) -> GatewayResult<Tractor> {
        self.begin(Call::UpdateTractor(payload.clone())).await?;
        let mut state = self.state.lock().unwrap();
        let tractor = state
            .tractors
            .get_mut(&payload.tractor_id)
            .ok_or_else(|| not_found("Tractor"))?;
        if let Some(hours) = payload.engine_hours {
            tractor.engine_hours = hours;
        }
        if let Some(intensity) = payload.usage_intensity {
            tractor.usage_intensity = intensity;
        }
        if let Some(health) = payload.health_status {
            tractor.health_status = health;
        }
        Ok(tractor.clone())
    }

    async fn fetch_tractors(&self) -> GatewayResult<Vec<Tractor>> {
        self.begin(Call::FetchTractors).await?;
        Ok(self.state.lock().unwrap().tractors.values().cloned().collect())
    }

    async fn fetch_maintenance(&self, tractor_id: &str) -> GatewayResult<Vec<MaintenanceTask>> {
        self.begin(Call::FetchMaintenance(tractor_id.to_string()))
            .await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .tasks
            .values()
            .filter(|t| t.tractor_id == tractor_id)
            .cloned()
            .collect())
    }

    async fn fetch_usage_history(
        &self,
        tractor_id: &str,
        _days: u32,
    ) -> GatewayResult<Vec<UsageRecord>> {
        self.begin(Call::FetchUsage(tractor_id.to_string())).await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .usage
            .iter()
            .filter(|r| r.tractor_id == tractor_id)
            .cloned()
            .collect())
    }
}

// ── Fixtures ────────────────────────────────────────────────────

pub fn tractor(tractor_id: &str, engine_hours: f64) -> Tractor {
    Tractor {
        id: format!("doc-{}", tractor_id.to_lowercase()),
        tractor_id: tractor_id.to_string(),
        model: "MF 375".to_string(),
        make: "Massey Ferguson".to_string(),
        engine_hours,
        usage_intensity: UsageIntensity::Moderate,
        health_status: HealthStatus::Good,
        baseline_status: "pending".to_string(),
        updated_at: None,
    }
}

pub fn usage(tractor_id: &str, end_hours: f64, hours_used: f64, notes: &str) -> UsageLogPayload {
    UsageLogPayload {
        tractor_id: tractor_id.to_string(),
        end_hours,
        hours_used,
        notes: Some(notes.to_string()),
        logged_at: Utc::now(),
    }
}

/// Config with enqueue-time delivery off, so tests decide when drains run.
pub fn quiet_config() -> SyncConfig {
    SyncConfig {
        attempt_on_enqueue: false,
        refresh_after_drain: false,
        ..SyncConfig::default()
    }
}

pub async fn open_engine(
    store: &MemoryStore,
    gateway: &Arc<FakeGateway>,
    monitor: &Arc<ConnectivityMonitor>,
    config: SyncConfig,
) -> Arc<SyncEngine> {
    let store: Arc<dyn DurableStore> = Arc::new(store.clone());
    let gateway: Arc<dyn RemoteGateway> = gateway.clone();
    SyncEngine::open(store, gateway, Arc::clone(monitor), config)
        .await
        .expect("engine opens")
}

/// Waits for the next completed pass that actually ran.
pub async fn next_drain(events: &mut broadcast::Receiver<SyncEvent>) -> DrainReport {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(SyncEvent::DrainCompleted(report)) if !report.skipped => return report,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("sync events closed"),
            }
        }
    })
    .await
    .expect("drain did not complete")
}
