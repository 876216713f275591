//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Metrics collection and export utilities."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry, TextEncoder, TEXT_FORMAT};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
///
/// Binding happens before this returns, so `addr` may use port 0 and the
/// real port is read back from [`MetricsServer::addr`].
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new()
        .route("/metrics", get(scrape))
        .with_state(registry);

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {addr}"))?;
    std_listener
        .set_nonblocking(true)
        .context("failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .context("failed to read metrics listener address")?;
    let listener =
        TcpListener::from_std(std_listener).context("failed to create tokio metrics listener")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(address = %bound, "metrics exporter listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics exporter stopped with an error")
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Text exposition of every family in `registry`.
pub fn render(registry: &Registry) -> Result<String> {
    TextEncoder::new()
        .encode_to_string(&registry.gather())
        .context("failed to encode metrics")
}

async fn scrape(State(registry): State<SharedRegistry>) -> Response {
    match render(&registry) {
        Ok(body) => (
            [(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT))],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "metrics scrape failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error").into_response()
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task.await.context("metrics exporter task panicked")?
    }
}

/// Counters recorded across DR runs and their deferred restores.
#[derive(Clone, Debug)]
pub struct DrMetrics {
    registry: SharedRegistry,
    events: IntCounterVec,
    device_commands: IntCounterVec,
    restores: IntCounterVec,
    status_updates: IntCounterVec,
    daemon_starts: IntCounter,
}

impl DrMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let events = IntCounterVec::new(
            Opts::new("dr_events_total", "DR signals processed, by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(events.clone()))?;

        let device_commands = IntCounterVec::new(
            Opts::new(
                "dr_device_commands_total",
                "Switch commands sent to managed devices, by command and status",
            ),
            &["command", "status"],
        )?;
        registry.register(Box::new(device_commands.clone()))?;

        let restores = IntCounterVec::new(
            Opts::new(
                "dr_restores_total",
                "Deferred device restores, by lifecycle status",
            ),
            &["status"],
        )?;
        registry.register(Box::new(restores.clone()))?;

        let status_updates = IntCounterVec::new(
            Opts::new(
                "dr_status_updates_total",
                "Status indicator updates, by label and result",
            ),
            &["label", "result"],
        )?;
        registry.register(Box::new(status_updates.clone()))?;

        let daemon_starts = IntCounter::with_opts(Opts::new(
            "dr_relayd_starts_total",
            "Total number of times the DR Relay daemon has initialised",
        ))?;
        registry.register(Box::new(daemon_starts.clone()))?;

        Ok(Self {
            registry,
            events,
            device_commands,
            restores,
            status_updates,
            daemon_starts,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_event(&self, outcome: &str) {
        self.events.with_label_values(&[outcome]).inc();
    }

    pub fn record_device_command(&self, command: &str, success: bool) {
        let status = if success { "success" } else { "failed" };
        self.device_commands
            .with_label_values(&[command, status])
            .inc();
    }

    pub fn record_restore(&self, status: &str) {
        self.restores.with_label_values(&[status]).inc();
    }

    pub fn record_status_update(&self, label: &str, result: &str) {
        self.status_updates
            .with_label_values(&[label, result])
            .inc();
    }

    pub fn inc_start(&self) {
        self.daemon_starts.inc();
    }

    /// Current value of a restore counter, mostly useful to tests.
    pub fn restore_count(&self, status: &str) -> u64 {
        self.restores.with_label_values(&[status]).get()
    }

    /// Current value of a device command counter, mostly useful to tests.
    pub fn device_command_count(&self, command: &str, success: bool) -> u64 {
        let status = if success { "success" } else { "failed" };
        self.device_commands
            .with_label_values(&[command, status])
            .get()
    }
}

pub use prometheus;
