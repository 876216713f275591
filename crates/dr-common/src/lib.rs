//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the DR runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Core shared primitives for the DR Relay workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the daemon, the HTTP front end, and the orchestrator.

pub mod config;
pub mod logging;

pub use config::{
    ApiConfig, AppConfig, DeviceApiConfig, LoggingConfig, MetricsConfig, OptOutSourceKind,
    OrchestratorConfig, RestoreConfig, StatusIndicatorConfig, StoreConfig,
};
pub use logging::{init_tracing, LogFormat};
