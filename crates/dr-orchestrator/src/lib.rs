//! ---
//! ems_section: "04-configuration-orchestration"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "DR event state machine coordinating devices and deferred restores."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Demand-response orchestration kernel.
//!
//! [`DrOrchestrator::process`] drives one DR signal through notification,
//! the opt-out window, per-device load shedding, and hands every device that
//! was switched off to a [`RestoreScheduler`] which switches it back on after
//! the event duration, independently of the run itself.

pub mod cancel;
pub mod notify;
pub mod opt_out;
pub mod orchestrator;
pub mod outcome;
pub mod restore;
pub mod signal;
pub mod status;

pub use cancel::{cancellation_pair, CancelHandle, RunCancellation};
pub use notify::{LogNotifier, Notification, NotificationOutcome, Notifier};
pub use opt_out::{NeverOptedOut, OptOutSource, StoredOptOut};
pub use orchestrator::{DrOrchestrator, DrRun, OrchestratorSettings, COMPLETED_MESSAGE};
pub use outcome::{AbortReason, CommandStatus, CompletedRun, DeviceCommandResult, DrOutcome, DrPhase};
pub use restore::{DurableRestoreScheduler, RestoreScheduler, RestoreTask, TimerRestoreScheduler};
pub use signal::{DrContext, DrError, DrSignal};
pub use status::{DeviceStatusIndicator, StatusIndicator, StatusLabel, StatusUpdate};
