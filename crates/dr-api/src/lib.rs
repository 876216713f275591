//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "HTTP entry points for DR events, installation, device listing and opt-out."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---

use std::fmt;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use dr_common::StatusIndicatorConfig;
use dr_devices::{ClientFactory, DeviceSummary, ManagedDevice};
use dr_orchestrator::{DrContext, DrOrchestrator, DrOutcome, DrSignal};
use dr_store::{
    load_installation, merge_device_groups, save_installation, synthetic_status_device_id,
    InstallationState, SharedInstallationStore,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

mod runs;

use runs::InFlightRuns;

const NOT_CONFIGURED: &str = "No setup / devices configured";
const NO_DEVICES: &str = "No devices configured or token missing. Open App on phone to sync.";

/// Shared API state exposed to handlers.
pub struct ApiState {
    installation_id: String,
    store: SharedInstallationStore,
    orchestrator: DrOrchestrator,
    clients: Arc<dyn ClientFactory>,
    runs: Arc<InFlightRuns>,
    synthetic_prefix: String,
    start: Instant,
}

impl ApiState {
    pub fn new(
        installation_id: impl Into<String>,
        store: SharedInstallationStore,
        orchestrator: DrOrchestrator,
        clients: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            installation_id: installation_id.into(),
            store,
            orchestrator,
            clients,
            runs: Arc::new(InFlightRuns::default()),
            synthetic_prefix: StatusIndicatorConfig::default().synthetic_prefix,
            start: Instant::now(),
        }
    }

    /// Prefix of the placeholder status device id written on installation.
    pub fn with_synthetic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.synthetic_prefix = prefix.into();
        self
    }

    async fn load_state(&self) -> Result<InstallationState, ApiError> {
        load_installation(&self.store, &self.installation_id)
            .await
            .map_err(|err| {
                error!(installation = %self.installation_id, error = %err, "failed to load installation state");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            })
    }

    async fn save_state(&self, state: InstallationState) -> Result<(), ApiError> {
        save_installation(&self.store, &self.installation_id, state)
            .await
            .map_err(|err| {
                error!(installation = %self.installation_id, error = %err, "failed to persist installation state");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            })
    }
}

impl fmt::Debug for ApiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiState")
            .field("installation_id", &self.installation_id)
            .field("orchestrator", &self.orchestrator)
            .field("in_flight", &self.runs.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct EventResponse {
    result: DrOutcome,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    #[serde(rename = "eventId")]
    event_id: String,
    cancelled: usize,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum DeviceEntry {
    Summary(DeviceSummary),
    Error {
        #[serde(rename = "deviceId")]
        device_id: String,
        error: String,
    },
}

#[derive(Debug, Serialize)]
struct DevicesResponse {
    count: usize,
    devices: Vec<DeviceEntry>,
}

/// One entry of a device selection, as the platform delivers it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceSetting {
    device_config: ManagedDevice,
}

/// Install/update lifecycle payload: credentials plus the device selections
/// of each category on the configuration page.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstallationBody {
    auth_token: String,
    #[serde(default)]
    location_id: Option<String>,
    #[serde(default)]
    managed_switches: Vec<DeviceSetting>,
    #[serde(default)]
    managed_power: Vec<DeviceSetting>,
    #[serde(default)]
    managed_ref: Vec<DeviceSetting>,
    #[serde(default)]
    managed_wash: Vec<DeviceSetting>,
    #[serde(default)]
    managed_others: Vec<DeviceSetting>,
}

impl InstallationBody {
    fn into_registry(self) -> Vec<ManagedDevice> {
        let groups = [
            self.managed_switches,
            self.managed_power,
            self.managed_ref,
            self.managed_wash,
            self.managed_others,
        ];
        merge_device_groups(
            groups
                .into_iter()
                .map(|group| group.into_iter().map(|setting| setting.device_config)),
        )
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InstallationResponse {
    installation_id: String,
    dr_status_device_id: String,
    managed_devices: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptOutBody {
    opted_out: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
    in_flight: usize,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub struct ApiServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl ApiServer {
    /// Address actually bound, useful when listening on port 0.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }
}

/// Routes served by the DR Relay API.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/dr-event", post(post_dr_event))
        .route("/dr-event/:event_id/cancel", post(post_cancel))
        .route("/installation", post(post_installation))
        .route("/devices", get(get_devices))
        .route("/opt-out", put(put_opt_out))
        .route("/healthz", get(get_health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Spawn the REST API.
pub fn spawn_api_server(state: Arc<ApiState>, addr: SocketAddr) -> Result<ApiServer> {
    let router = router(state);

    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind API listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure API listener as non-blocking")?;
    let bound = listener
        .local_addr()
        .context("failed to read API listener address")?;
    let tcp_listener =
        TcpListener::from_std(listener).context("failed to create tokio listener")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(address = %bound, "api server listening");
        if let Err(err) = axum::serve(tcp_listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        {
            error!(address = %bound, error = %err, "api server exited with error");
            return Err(err.into());
        }
        Ok(())
    });

    Ok(ApiServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

async fn post_dr_event(
    State(state): State<Arc<ApiState>>,
    Json(signal): Json<DrSignal>,
) -> Result<Json<EventResponse>, ApiError> {
    info!(event_id = %signal.event_id, level = ?signal.level, duration = ?signal.duration, "dr event received");

    let installation = state.load_state().await?;
    if !installation.is_configured() {
        return Err(ApiError::bad_request(NOT_CONFIGURED));
    }
    let token = installation.token.clone().unwrap_or_default();
    if token.is_empty() {
        warn!(installation = %state.installation_id, "no device api token stored; commands will be rejected");
    }
    let client = state
        .clients
        .client_for(&token)
        .map_err(|err| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.message))?;

    let mut ctx = DrContext::new(
        state.installation_id.clone(),
        client,
        installation.devices().to_vec(),
    );
    if let Some(status_device) = installation.dr_status_device_id.clone() {
        ctx = ctx.with_status_device(status_device);
    }

    let (_registration, cancellation) = state.runs.register(&signal.event_id);
    let outcome = state
        .orchestrator
        .process_with_cancellation(&signal, &ctx, cancellation)
        .await
        .map_err(|err| ApiError::bad_request(err.to_string()))?;
    Ok(Json(EventResponse { result: outcome }))
}

async fn post_cancel(
    State(state): State<Arc<ApiState>>,
    Path(event_id): Path<String>,
) -> Result<(StatusCode, Json<CancelResponse>), ApiError> {
    let cancelled = state.runs.cancel(&event_id);
    if cancelled == 0 {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("no in-flight run for event '{event_id}'"),
        ));
    }
    info!(%event_id, cancelled, "dr event cancellation requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            event_id,
            cancelled,
        }),
    ))
}

async fn get_devices(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<DevicesResponse>, ApiError> {
    let installation = state.load_state().await?;
    let (Some(devices), Some(token)) = (&installation.managed_devices, &installation.token) else {
        return Err(ApiError::bad_request(NO_DEVICES));
    };
    let client = state
        .clients
        .client_for(token)
        .map_err(|err| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.message))?;

    let mut entries = Vec::with_capacity(devices.len());
    for device in devices {
        let id = device.device_id.as_str();
        let summary = async {
            let status = client.status(id).await?;
            let snapshot = client.get(id).await?;
            Ok::<_, dr_devices::CommandError>(DeviceSummary::from_documents(id, &snapshot, &status))
        }
        .await;
        entries.push(match summary {
            Ok(summary) => DeviceEntry::Summary(summary),
            Err(err) => {
                warn!(device = %id, error = %err, "device summary unavailable");
                DeviceEntry::Error {
                    device_id: id.to_owned(),
                    error: err.message,
                }
            }
        });
    }

    Ok(Json(DevicesResponse {
        count: entries.len(),
        devices: entries,
    }))
}

async fn post_installation(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<InstallationBody>,
) -> Result<Json<InstallationResponse>, ApiError> {
    if body.auth_token.trim().is_empty() {
        return Err(ApiError::bad_request("authToken is required"));
    }

    let mut installation = state.load_state().await?;
    installation.token = Some(body.auth_token.clone());
    installation.location_id = body.location_id.clone();
    let registry = body.into_registry();
    let managed_devices = registry.len();
    installation.managed_devices = Some(registry);
    // No indicator device can be provisioned here; the placeholder id keeps
    // the installation configured while status updates are skipped.
    let status_device = synthetic_status_device_id(&state.synthetic_prefix);
    installation.dr_status_device_id = Some(status_device.clone());
    state.save_state(installation).await?;

    info!(
        installation = %state.installation_id,
        managed_devices,
        status_device = %status_device,
        "installation updated"
    );
    Ok(Json(InstallationResponse {
        installation_id: state.installation_id.clone(),
        dr_status_device_id: status_device,
        managed_devices,
    }))
}

async fn put_opt_out(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<OptOutBody>,
) -> Result<Json<OptOutBody>, ApiError> {
    let mut installation = state.load_state().await?;
    installation.opted_out = Some(body.opted_out);
    state.save_state(installation).await?;
    info!(installation = %state.installation_id, opted_out = body.opted_out, "opt-out flag updated");
    Ok(Json(body))
}

async fn get_health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.start.elapsed().as_secs(),
        in_flight: state.runs.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use dr_devices::{
        DeviceSnapshot, DeviceStatus, ManagedDevice, MockDeviceClient, StaticClientFactory,
    };
    use dr_orchestrator::{OrchestratorSettings, StoredOptOut, TimerRestoreScheduler};
    use dr_store::{InstallationStore, MemoryInstallationStore};
    use serde_json::{json, Value};

    struct Harness {
        server: ApiServer,
        store: Arc<MemoryInstallationStore>,
        client: Arc<MockDeviceClient>,
        restores: TimerRestoreScheduler,
        http: reqwest::Client,
    }

    impl Harness {
        fn url(&self, path: &str) -> String {
            format!("http://{}{}", self.server.addr(), path)
        }
    }

    fn configured_state() -> InstallationState {
        InstallationState {
            token: Some("tok".into()),
            location_id: Some("loc-1".into()),
            managed_devices: Some(vec![ManagedDevice::new("d1"), ManagedDevice::new("d2")]),
            dr_status_device_id: Some("virtual-dr-device-id-1700000000000".into()),
            opted_out: None,
        }
    }

    fn start(state: InstallationState, window: Duration) -> Harness {
        let store = Arc::new(MemoryInstallationStore::with_state("default", state));
        let client = Arc::new(MockDeviceClient::new());
        let restores = TimerRestoreScheduler::new();
        let settings = OrchestratorSettings {
            opt_out_window: window,
            ..OrchestratorSettings::default()
        };
        let orchestrator = DrOrchestrator::new(settings, Arc::new(restores.clone()))
            .with_opt_out(Arc::new(StoredOptOut::new(store.clone())));
        let api = ApiState::new(
            "default",
            store.clone(),
            orchestrator,
            Arc::new(StaticClientFactory::new(client.clone())),
        );
        let server = spawn_api_server(Arc::new(api), "127.0.0.1:0".parse().unwrap()).unwrap();
        Harness {
            server,
            store,
            client,
            restores,
            http: reqwest::Client::new(),
        }
    }

    #[tokio::test]
    async fn dr_event_reports_per_device_results() {
        let harness = start(configured_state(), Duration::from_millis(20));
        harness.client.fail("d2", "off", "timeout");

        let response = harness
            .http
            .post(harness.url("/dr-event"))
            .json(&json!({"eventId": "e1", "duration": 0}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(
            body,
            json!({"result": {
                "message": "DR Event Processed",
                "results": [
                    {"deviceId": "d1", "status": "Success"},
                    {"deviceId": "d2", "status": "Failed", "error": "timeout"}
                ]
            }})
        );

        harness.restores.wait_idle().await;
        assert_eq!(harness.client.calls_for("d1", "on").len(), 1);
        assert!(harness.client.calls_for("d2", "on").is_empty());
        harness.server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn unconfigured_installation_is_rejected() {
        let harness = start(InstallationState::default(), Duration::from_millis(20));
        let response = harness
            .http
            .post(harness.url("/dr-event"))
            .json(&json!({"eventId": "e1"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({"error": NOT_CONFIGURED}));
        assert!(harness.client.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_event_id_is_a_bad_request() {
        let harness = start(configured_state(), Duration::from_millis(20));
        let response = harness
            .http
            .post(harness.url("/dr-event"))
            .json(&json!({"level": 1}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], json!("invalid signal: eventId is required"));
        assert!(harness.client.calls().is_empty());
    }

    #[tokio::test]
    async fn stored_opt_out_aborts_the_event() {
        let harness = start(configured_state(), Duration::from_millis(20));
        let response = harness
            .http
            .put(harness.url("/opt-out"))
            .json(&json!({"optedOut": true}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(harness.store.load("default").unwrap().opted_out, Some(true));

        let body: Value = harness
            .http
            .post(harness.url("/dr-event"))
            .json(&json!({"eventId": "e1"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body, json!({"result": "Aborted by User"}));
        assert!(harness.client.calls().is_empty());
    }

    #[tokio::test]
    async fn cancel_stops_a_waiting_run() {
        let harness = start(configured_state(), Duration::from_secs(30));
        let http = harness.http.clone();
        let url = harness.url("/dr-event");
        let pending = tokio::spawn(async move {
            http.post(url)
                .json(&json!({"eventId": "e7"}))
                .send()
                .await
                .unwrap()
                .json::<Value>()
                .await
                .unwrap()
        });

        let mut accepted = false;
        for _ in 0..100 {
            let response = harness
                .http
                .post(harness.url("/dr-event/e7/cancel"))
                .send()
                .await
                .unwrap();
            if response.status() == 202 {
                accepted = true;
                break;
            }
            assert_eq!(response.status(), 404);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(accepted);

        let body = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body, json!({"result": "Cancelled"}));
        assert!(harness.client.calls().is_empty());

        let response = harness
            .http
            .post(harness.url("/dr-event/e7/cancel"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn devices_lists_summaries_and_errors() {
        let harness = start(configured_state(), Duration::from_millis(20));
        harness.client.with_snapshot(
            "d1",
            DeviceSnapshot {
                device_id: "d1".into(),
                label: Some("Heater".into()),
                ..Default::default()
            },
        );
        let status: DeviceStatus = serde_json::from_value(json!({
            "components": {"main": {
                "switch": {"switch": {"value": "on"}},
                "powerMeter": {"power": {"value": 1200.0}}
            }}
        }))
        .unwrap();
        harness.client.with_status("d1", status);

        let body: Value = harness
            .http
            .get(harness.url("/devices"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["count"], json!(2));
        assert_eq!(body["devices"][0]["deviceId"], json!("d1"));
        assert_eq!(body["devices"][0]["label"], json!("Heater"));
        assert_eq!(body["devices"][0]["switch"], json!("on"));
        assert_eq!(body["devices"][0]["power"], json!(1200.0));
        assert_eq!(
            body["devices"][1],
            json!({"deviceId": "d2", "error": "request failed with status code 404"})
        );
    }

    #[tokio::test]
    async fn devices_requires_a_token() {
        let mut state = configured_state();
        state.token = None;
        let harness = start(state, Duration::from_millis(20));
        let response = harness.http.get(harness.url("/devices")).send().await.unwrap();
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({"error": NO_DEVICES}));
    }

    #[tokio::test]
    async fn installation_merges_selections_and_survives_opt_out() {
        let existing = InstallationState {
            opted_out: Some(false),
            ..Default::default()
        };
        let harness = start(existing, Duration::from_millis(20));

        let response = harness
            .http
            .post(harness.url("/installation"))
            .json(&json!({
                "authToken": "tok-2",
                "locationId": "loc-9",
                "managedSwitches": [
                    {"deviceConfig": {"deviceId": "plug", "componentId": "main", "permissions": ["r", "x"]}},
                    {"deviceConfig": {"deviceId": "lamp", "componentId": "main"}}
                ],
                "managedPower": [
                    {"deviceConfig": {"deviceId": "plug", "componentId": "meter", "permissions": ["r"]}}
                ],
                "managedWash": [
                    {"deviceConfig": {"deviceId": "washer", "componentId": "main"}}
                ]
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["installationId"], json!("default"));
        assert_eq!(body["managedDevices"], json!(3));
        let status_id = body["drStatusDeviceId"].as_str().unwrap().to_owned();
        assert!(status_id.starts_with("virtual-dr-device-id-"));

        let response = harness
            .http
            .put(harness.url("/opt-out"))
            .json(&json!({"optedOut": false}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let stored = harness.store.load("default").unwrap();
        assert!(stored.is_configured());
        assert_eq!(stored.token.as_deref(), Some("tok-2"));
        assert_eq!(stored.location_id.as_deref(), Some("loc-9"));
        assert_eq!(stored.dr_status_device_id.as_deref(), Some(status_id.as_str()));
        assert_eq!(
            serde_json::to_value(stored.devices()).unwrap(),
            json!([
                {"deviceId": "plug", "componentId": "meter", "permissions": ["r"]},
                {"deviceId": "lamp", "componentId": "main"},
                {"deviceId": "washer", "componentId": "main"}
            ])
        );

        let body: Value = harness
            .http
            .post(harness.url("/dr-event"))
            .json(&json!({"eventId": "e1", "duration": 0}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["result"]["results"].as_array().unwrap().len(), 3);
        assert!(harness.client.calls().iter().all(|call| call.capability != "msg"));
    }

    #[tokio::test]
    async fn installation_requires_a_token() {
        let harness = start(InstallationState::default(), Duration::from_millis(20));
        let response = harness
            .http
            .post(harness.url("/installation"))
            .json(&json!({"authToken": " ", "managedSwitches": []}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        assert!(!harness.store.load("default").unwrap().is_configured());
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let harness = start(InstallationState::default(), Duration::from_millis(20));
        let body: Value = harness
            .http
            .get(harness.url("/healthz"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], json!("ok"));
        assert_eq!(body["inFlight"], json!(0));
    }
}
