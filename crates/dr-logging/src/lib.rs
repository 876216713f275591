//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Structured logging context for DR runs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]

use tracing::Level;

pub mod macros;

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Installation the run belongs to.
    pub installation: Option<&'a str>,
    /// DR event identifier carried by the inbound signal.
    pub event: Option<&'a str>,
    /// Run identifier assigned when the orchestrator accepted the signal.
    pub run: Option<&'a str>,
    /// Device identifier the log line is about.
    pub device: Option<&'a str>,
    /// Orchestrator phase at the time of the log line.
    pub phase: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an installation identifier.
    pub fn with_installation(mut self, installation: &'a str) -> Self {
        self.installation = Some(installation);
        self
    }

    /// Attach a DR event identifier.
    pub fn with_event(mut self, event: &'a str) -> Self {
        self.event = Some(event);
        self
    }

    /// Attach a run identifier.
    pub fn with_run(mut self, run: &'a str) -> Self {
        self.run = Some(run);
        self
    }

    /// Attach a device identifier.
    pub fn with_device(mut self, device: &'a str) -> Self {
        self.device = Some(device);
        self
    }

    /// Attach an orchestrator phase name.
    pub fn with_phase(mut self, phase: &'a str) -> Self {
        self.phase = Some(phase);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation was skipped or degraded but the run continues.
    Degraded,
    /// The operation failed or was aborted.
    Fault,
}

impl SystemEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Degraded => "degraded",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event with an outcome.
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    let outcome_str = outcome.as_str();
    macro_rules! emit {
        ($level:expr) => {
            tracing::event!(
                $level,
                event,
                outcome = outcome_str,
                installation = ctx.installation.unwrap_or(""),
                dr_event = ctx.event.unwrap_or(""),
                run = ctx.run.unwrap_or(""),
                device = ctx.device.unwrap_or(""),
                phase = ctx.phase.unwrap_or(""),
                message = %message
            )
        };
    }
    match outcome {
        SystemEventOutcome::Fault => emit!(Level::ERROR),
        SystemEventOutcome::Degraded => emit!(Level::WARN),
        SystemEventOutcome::Success => emit!(Level::INFO),
    }
}
