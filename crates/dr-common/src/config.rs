//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the DR runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

fn default_device_api_base() -> String {
    "https://api.smartthings.com/v1".to_owned()
}

fn default_device_api_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_opt_out_window() -> Duration {
    Duration::from_secs(30)
}

fn default_restore_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_execute_concurrency() -> usize {
    1
}

fn default_synthetic_prefix() -> String {
    "virtual-".to_owned()
}

fn default_status_component() -> String {
    "main".to_owned()
}

fn default_status_capability() -> String {
    "msg".to_owned()
}

fn default_status_command() -> String {
    "set".to_owned()
}

fn default_store_directory() -> PathBuf {
    PathBuf::from("data/installations")
}

fn default_installation_id() -> String {
    "default".to_owned()
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("data/restore-queue.json")
}

/// Primary configuration object for the DR Relay runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub device_api: DeviceApiConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub status_indicator: StatusIndicatorConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub restore: RestoreConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "DR_RELAY_CONFIG";

    /// Load configuration from disk, respecting the `DR_RELAY_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("failed to load config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.device_api.validate()?;
        self.orchestrator.validate()?;
        self.store.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            listen: default_api_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

/// Location and transport settings for the external device-control API.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceApiConfig {
    #[serde(default = "default_device_api_base")]
    pub base_url: String,
    #[serde(default = "default_device_api_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
}

impl Default for DeviceApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_device_api_base(),
            timeout: default_device_api_timeout(),
        }
    }
}

impl DeviceApiConfig {
    pub fn validate(&self) -> Result<()> {
        let parsed = Url::parse(&self.base_url)
            .with_context(|| format!("device_api.base_url '{}' is not a url", self.base_url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!(
                "device_api.base_url must use http or https, found '{}'",
                parsed.scheme()
            ));
        }
        if self.timeout.is_zero() {
            return Err(anyhow!("device_api.timeout must be greater than zero"));
        }
        Ok(())
    }
}

/// Where the orchestrator reads the user's opt-out decision from.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OptOutSourceKind {
    /// Read the persisted installation flag; absent means not opted out.
    #[default]
    Stored,
    /// Always proceed with load control.
    Never,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_opt_out_window")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub opt_out_window: Duration,
    #[serde(default = "default_restore_delay")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub default_restore_delay: Duration,
    #[serde(default = "default_execute_concurrency")]
    pub execute_concurrency: usize,
    #[serde(default)]
    pub opt_out_source: OptOutSourceKind,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            opt_out_window: default_opt_out_window(),
            default_restore_delay: default_restore_delay(),
            execute_concurrency: default_execute_concurrency(),
            opt_out_source: OptOutSourceKind::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.execute_concurrency == 0 {
            return Err(anyhow!("orchestrator.execute_concurrency must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusIndicatorConfig {
    #[serde(default = "default_synthetic_prefix")]
    pub synthetic_prefix: String,
    #[serde(default = "default_status_component")]
    pub component: String,
    #[serde(default = "default_status_capability")]
    pub capability: String,
    #[serde(default = "default_status_command")]
    pub command: String,
}

impl Default for StatusIndicatorConfig {
    fn default() -> Self {
        Self {
            synthetic_prefix: default_synthetic_prefix(),
            component: default_status_component(),
            capability: default_status_capability(),
            command: default_status_command(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_installation_id")]
    pub installation_id: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            directory: default_store_directory(),
            installation_id: default_installation_id(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.installation_id.trim().is_empty() {
            return Err(anyhow!("store.installation_id cannot be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    #[serde(default)]
    pub durable: bool,
    #[serde(default = "default_queue_path")]
    pub queue_path: PathBuf,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            durable: false,
            queue_path: default_queue_path(),
        }
    }
}
