//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the DR runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "DR_RELAY_LOG";
const RUST_LOG_ENV: &str = "RUST_LOG";
/// Verbose for our crates, quieter for the HTTP stack underneath them.
const DEFAULT_DIRECTIVE: &str = "debug,hyper=info,hyper_util=info,reqwest=info,rustls=info";

/// Writer guards for the file and stdout appenders; dropping them stops the writers.
static GUARDS: OnceCell<(WorkerGuard, WorkerGuard)> = OnceCell::new();

/// Available log formats for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Pick the filter directive: `DR_RELAY_LOG`, then `RUST_LOG`, then the default.
/// Blank variables are ignored. Returns the directive and where it came from.
fn select_directive(relay: Option<String>, rust_log: Option<String>) -> (String, &'static str) {
    let non_blank = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
    if let Some(directive) = non_blank(relay) {
        return (directive, LOG_ENV);
    }
    if let Some(directive) = non_blank(rust_log) {
        return (directive, RUST_LOG_ENV);
    }
    (DEFAULT_DIRECTIVE.to_owned(), "default")
}

fn build_filter() -> (EnvFilter, &'static str) {
    let (directive, source) = select_directive(
        std::env::var(LOG_ENV).ok(),
        std::env::var(RUST_LOG_ENV).ok(),
    );
    match EnvFilter::try_new(&directive) {
        Ok(filter) => (filter, source),
        Err(err) => {
            eprintln!("invalid {source} directive '{directive}' ({err}); using '{DEFAULT_DIRECTIVE}'");
            (EnvFilter::new(DEFAULT_DIRECTIVE), "default")
        }
    }
}

/// Install the process-wide subscriber for `service_name`.
///
/// Stdout gets JSON (flattened, with the current span) or pretty output per
/// `config.format`; `{directory}/{prefix}.log.<date>` always receives JSON.
/// Calling it again is harmless: the first subscriber stays installed.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!("unable to create log directory {}", config.directory.display())
    })?;
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);

    let (file_writer, file_guard) =
        tracing_appender::non_blocking(daily(&config.directory, format!("{prefix}.log")));
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };
    let file_layer = fmt::layer()
        .json()
        .flatten_event(true)
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(file_writer)
        .boxed();

    let (filter, filter_source) = build_filter();
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .is_ok();
    if !installed {
        return Ok(());
    }
    let _ = GUARDS.set((file_guard, stdout_guard));

    info!(
        service = %service_name,
        log_dir = %config.directory.display(),
        format = ?config.format,
        filter_source,
        "tracing initialised"
    );
    Ok(())
}
