//! ---
//! ems_section: "04-configuration-orchestration"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "DR event state machine coordinating devices and deferred restores."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};

/// Phases of one DR run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrPhase {
    /// Signal accepted and validated.
    Received,
    /// Notification emitted.
    Notified,
    /// Waiting out the opt-out window.
    PendingOptOut,
    /// Terminal: the user opted out or the run was cancelled.
    Aborted,
    /// Switching devices off.
    Executing,
    /// Terminal for the synchronous part; restores continue on their own.
    Active,
}

impl DrPhase {
    /// Stable name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            DrPhase::Received => "received",
            DrPhase::Notified => "notified",
            DrPhase::PendingOptOut => "pending_opt_out",
            DrPhase::Aborted => "aborted",
            DrPhase::Executing => "executing",
            DrPhase::Active => "active",
        }
    }
}

impl fmt::Display for DrPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the switch-off command for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatus {
    /// The device accepted the command.
    Success,
    /// The command could not be delivered.
    Failed,
}

/// Per-device entry of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCommandResult {
    /// Device the command targeted.
    pub device_id: String,
    /// Whether the command succeeded.
    pub status: CommandStatus,
    /// Failure message, only present when the command failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeviceCommandResult {
    /// Successful command.
    pub fn success(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            status: CommandStatus::Success,
            error: None,
        }
    }

    /// Failed command with its message.
    pub fn failed(device_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            status: CommandStatus::Failed,
            error: Some(error.into()),
        }
    }

    /// Whether the command succeeded.
    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }
}

/// Why a run stopped before touching devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// The user opted out during the window.
    #[serde(rename = "Aborted by User")]
    OptedOut,
    /// The run was cancelled while waiting in the window.
    #[serde(rename = "Cancelled")]
    Cancelled,
}

impl AbortReason {
    /// Message reported to the caller.
    pub fn message(&self) -> &'static str {
        match self {
            AbortReason::OptedOut => "Aborted by User",
            AbortReason::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Payload of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedRun {
    /// Fixed completion message.
    pub message: String,
    /// Per-device results in registry order.
    pub results: Vec<DeviceCommandResult>,
}

/// Final result of [`crate::DrOrchestrator::process`].
///
/// Serialized untagged: an aborted run is the bare reason string, a completed
/// run is `{"message": ..., "results": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DrOutcome {
    /// Stopped before any device was touched.
    Aborted(AbortReason),
    /// Execute phase finished.
    Completed(CompletedRun),
}

impl DrOutcome {
    /// Short label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            DrOutcome::Aborted(AbortReason::OptedOut) => "opted_out",
            DrOutcome::Aborted(AbortReason::Cancelled) => "cancelled",
            DrOutcome::Completed(_) => "completed",
        }
    }

    /// Per-device results, empty for aborted runs.
    pub fn results(&self) -> &[DeviceCommandResult] {
        match self {
            DrOutcome::Aborted(_) => &[],
            DrOutcome::Completed(run) => &run.results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn aborted_outcome_is_a_bare_string() {
        let outcome = DrOutcome::Aborted(AbortReason::OptedOut);
        assert_eq!(serde_json::to_value(&outcome).unwrap(), json!("Aborted by User"));
        assert_eq!(
            serde_json::to_value(DrOutcome::Aborted(AbortReason::Cancelled)).unwrap(),
            json!("Cancelled")
        );
    }

    #[test]
    fn completed_outcome_matches_response_shape() {
        let outcome = DrOutcome::Completed(CompletedRun {
            message: "DR Event Processed".into(),
            results: vec![
                DeviceCommandResult::success("d1"),
                DeviceCommandResult::failed("d2", "timeout"),
            ],
        });
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({
                "message": "DR Event Processed",
                "results": [
                    {"deviceId": "d1", "status": "Success"},
                    {"deviceId": "d2", "status": "Failed", "error": "timeout"}
                ]
            })
        );
        assert_eq!(outcome.label(), "completed");
        assert_eq!(outcome.results().len(), 2);
    }

    #[test]
    fn outcome_parses_back_from_json() {
        let parsed: DrOutcome = serde_json::from_value(json!("Aborted by User")).unwrap();
        assert_eq!(parsed, DrOutcome::Aborted(AbortReason::OptedOut));
    }
}
