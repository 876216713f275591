//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the DR Relay daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use dr_api::{spawn_api_server, ApiServer, ApiState};
use dr_common::{init_tracing, AppConfig, OptOutSourceKind};
use dr_devices::{ClientFactory, HttpClientFactory};
use dr_metrics::{new_registry, spawn_http_server, DrMetrics};
use dr_orchestrator::{
    DeviceStatusIndicator, DrContext, DrOrchestrator, DrSignal, DurableRestoreScheduler,
    NeverOptedOut, OptOutSource, OrchestratorSettings, RestoreScheduler, StoredOptOut,
    TimerRestoreScheduler,
};
use dr_store::{
    load_installation, FileInstallationStore, InstallationStore, SharedInstallationStore,
};
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about = "DR Relay daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Serve the HTTP API and metrics until interrupted")]
    Serve,
    #[command(about = "Run one DR event against the stored installation")]
    Trigger {
        #[arg(long, help = "Event identifier")]
        event_id: String,
        #[arg(long, help = "Severity level")]
        level: Option<f64>,
        #[arg(long, help = "Seconds before controlled devices are switched back on")]
        duration: Option<f64>,
    },
    #[command(about = "Print the managed device registry")]
    Devices,
}

/// Restore backend selected by `[restore] durable`.
enum Restores {
    Timer(TimerRestoreScheduler),
    Durable(Arc<DurableRestoreScheduler>),
}

impl Restores {
    fn scheduler(&self) -> Arc<dyn RestoreScheduler> {
        match self {
            Restores::Timer(timers) => Arc::new(timers.clone()),
            Restores::Durable(durable) => durable.clone(),
        }
    }

    fn outstanding(&self) -> usize {
        match self {
            Restores::Timer(timers) => timers.outstanding(),
            Restores::Durable(durable) => durable.outstanding(),
        }
    }

    async fn wait_idle(&self) {
        match self {
            Restores::Timer(timers) => timers.wait_idle().await,
            Restores::Durable(durable) => durable.wait_idle().await,
        }
    }
}

/// Long-lived components shared by every subcommand.
struct Services {
    config: AppConfig,
    metrics: DrMetrics,
    store: SharedInstallationStore,
    clients: Arc<HttpClientFactory>,
    restores: Restores,
    orchestrator: DrOrchestrator,
}

impl Services {
    fn build(config: AppConfig, metrics: DrMetrics) -> Result<Self> {
        let store: SharedInstallationStore =
            Arc::new(FileInstallationStore::new(config.store.directory.clone()));
        let clients = Arc::new(
            HttpClientFactory::new(config.device_api.base_url.clone(), config.device_api.timeout)
                .map_err(|err| anyhow!(err.message))
                .context("failed to build device api client")?,
        );

        let restores = if config.restore.durable {
            let durable = DurableRestoreScheduler::open(&config.restore.queue_path)
                .with_context(|| {
                    format!(
                        "failed to open restore queue {}",
                        config.restore.queue_path.display()
                    )
                })?
                .with_metrics(metrics.clone());
            Restores::Durable(Arc::new(durable))
        } else {
            Restores::Timer(TimerRestoreScheduler::new().with_metrics(metrics.clone()))
        };

        let opt_out: Arc<dyn OptOutSource> = match config.orchestrator.opt_out_source {
            OptOutSourceKind::Stored => Arc::new(StoredOptOut::new(store.clone())),
            OptOutSourceKind::Never => Arc::new(NeverOptedOut),
        };
        let orchestrator = DrOrchestrator::new(
            OrchestratorSettings::from(&config.orchestrator),
            restores.scheduler(),
        )
        .with_opt_out(opt_out)
        .with_status_indicator(Arc::new(DeviceStatusIndicator::from_config(
            &config.status_indicator,
        )))
        .with_metrics(metrics.clone());

        Ok(Self {
            config,
            metrics,
            store,
            clients,
            restores,
            orchestrator,
        })
    }

    /// Re-arm restores persisted by a previous process.
    fn recover_restores(&self) -> usize {
        let Restores::Durable(durable) = &self.restores else {
            return 0;
        };
        durable.recover(|installation_id| {
            let state = match self.store.load(installation_id) {
                Ok(state) => state,
                Err(err) => {
                    warn!(installation = %installation_id, error = %err, "unable to load installation for restore recovery");
                    return None;
                }
            };
            let token = state.token?;
            self.clients.client_for(&token).ok()
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/dr-relay.toml"));
    candidates.push(PathBuf::from("configs/dr-relay.example.toml"));

    let loaded_config = AppConfig::load_with_source(&candidates)?;
    let config = loaded_config.config;
    init_tracing("dr-relayd", &config.logging)?;
    info!(config_path = %loaded_config.source.display(), "configuration loaded");

    let metrics = DrMetrics::new(new_registry())?;
    metrics.inc_start();
    let services = Services::build(config, metrics)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(services).await?,
        Commands::Trigger {
            event_id,
            level,
            duration,
        } => {
            let signal = DrSignal {
                event_id,
                level,
                duration,
            };
            trigger(services, signal).await?
        }
        Commands::Devices => print_devices(&services).await?,
    }

    Ok(())
}

async fn serve(services: Services) -> Result<()> {
    let metrics_settings = services.config.metrics.clone();
    let api_settings = services.config.api.clone();

    let metrics_server = if metrics_settings.enabled {
        info!(address = %metrics_settings.listen, "metrics exporter enabled");
        Some(spawn_http_server(
            services.metrics.registry(),
            metrics_settings.listen,
        )?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let recovered = services.recover_restores();
    if recovered > 0 {
        info!(recovered, "persisted restores re-armed");
    }

    let mut api_server: Option<ApiServer> = None;
    if api_settings.enabled {
        let state = Arc::new(
            ApiState::new(
                services.config.store.installation_id.clone(),
                services.store.clone(),
                services.orchestrator.clone(),
                services.clients.clone(),
            )
            .with_synthetic_prefix(services.config.status_indicator.synthetic_prefix.clone()),
        );
        match spawn_api_server(state, api_settings.listen) {
            Ok(server) => {
                info!(address = %server.addr(), "api server started");
                api_server = Some(server);
            }
            Err(err) => {
                warn!(error = %err, "failed to start api server");
            }
        }
    } else {
        info!("api server disabled by configuration");
    }

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    if let Some(server) = api_server {
        server.shutdown().await?;
    }
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    let outstanding = services.restores.outstanding();
    match &services.restores {
        Restores::Durable(_) if outstanding > 0 => {
            info!(outstanding, "pending restores remain queued for the next start")
        }
        Restores::Timer(_) if outstanding > 0 => {
            warn!(outstanding, "pending restores are dropped; devices stay off")
        }
        _ => {}
    }
    Ok(())
}

async fn trigger(services: Services, signal: DrSignal) -> Result<()> {
    services.recover_restores();

    let installation_id = services.config.store.installation_id.clone();
    let state = load_installation(&services.store, &installation_id)
        .await
        .with_context(|| format!("failed to load installation {installation_id}"))?;
    if !state.is_configured() {
        bail!("No setup / devices configured");
    }
    let client = services
        .clients
        .client_for(state.token.as_deref().unwrap_or_default())
        .map_err(|err| anyhow!(err.message))?;

    let mut ctx = DrContext::new(installation_id, client, state.devices().to_vec());
    if let Some(status_device) = state.dr_status_device_id.clone() {
        ctx = ctx.with_status_device(status_device);
    }

    let outcome = services.orchestrator.process(&signal, &ctx).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    let outstanding = services.restores.outstanding();
    if outstanding > 0 {
        info!(outstanding, "waiting for scheduled restores");
        services.restores.wait_idle().await;
    }
    Ok(())
}

async fn print_devices(services: &Services) -> Result<()> {
    let installation_id = &services.config.store.installation_id;
    let state = load_installation(&services.store, installation_id)
        .await
        .with_context(|| format!("failed to load installation {installation_id}"))?;
    println!("{}", serde_json::to_string_pretty(state.devices())?);
    Ok(())
}
