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

use async_trait::async_trait;
use dr_common::StatusIndicatorConfig;
use dr_devices::DeviceCommandClient;
use serde_json::Value;
use tracing::{debug, warn};

/// Display values pushed to the status pseudo-device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLabel {
    /// Waiting for the opt-out window to pass.
    Pending,
    /// Load control in effect.
    Active,
}

impl StatusLabel {
    /// Value written to the device.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusLabel::Pending => "Pending",
            StatusLabel::Active => "Active",
        }
    }
}

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to a status update. Never an error for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    /// No real device backs the indicator; nothing was sent.
    Skipped,
    /// The device accepted the update.
    Applied,
    /// The update could not be delivered.
    Failed(String),
}

impl StatusUpdate {
    /// Label used for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusUpdate::Skipped => "skipped",
            StatusUpdate::Applied => "applied",
            StatusUpdate::Failed(_) => "failed",
        }
    }
}

/// Best-effort updater of the DR status pseudo-device.
#[async_trait]
pub trait StatusIndicator: Send + Sync + 'static {
    /// Push `label` to `status_device_id` through `client`.
    async fn set_status(
        &self,
        client: &dyn DeviceCommandClient,
        status_device_id: Option<&str>,
        label: StatusLabel,
    ) -> StatusUpdate;
}

/// Sets the display value of a real device through the command API.
#[derive(Debug, Clone)]
pub struct DeviceStatusIndicator {
    synthetic_prefix: String,
    component: String,
    capability: String,
    command: String,
}

impl Default for DeviceStatusIndicator {
    fn default() -> Self {
        Self::from_config(&StatusIndicatorConfig::default())
    }
}

impl DeviceStatusIndicator {
    /// Build from the `[status_indicator]` configuration section.
    pub fn from_config(config: &StatusIndicatorConfig) -> Self {
        Self {
            synthetic_prefix: config.synthetic_prefix.clone(),
            component: config.component.clone(),
            capability: config.capability.clone(),
            command: config.command.clone(),
        }
    }

    /// The trimmed id of the real device behind `status_device_id`, if any.
    /// Absent, blank, and synthetic placeholder ids have no backing device.
    pub fn backing_device<'a>(&self, status_device_id: Option<&'a str>) -> Option<&'a str> {
        let id = status_device_id.map(str::trim).filter(|id| !id.is_empty())?;
        if !self.synthetic_prefix.is_empty() && id.starts_with(&self.synthetic_prefix) {
            return None;
        }
        Some(id)
    }
}

#[async_trait]
impl StatusIndicator for DeviceStatusIndicator {
    async fn set_status(
        &self,
        client: &dyn DeviceCommandClient,
        status_device_id: Option<&str>,
        label: StatusLabel,
    ) -> StatusUpdate {
        let Some(device_id) = self.backing_device(status_device_id) else {
            debug!(status_device = ?status_device_id, %label, "status indicator skipped");
            return StatusUpdate::Skipped;
        };
        let arguments = [Value::String(label.as_str().to_owned())];
        match client
            .execute(
                device_id,
                &self.component,
                &self.capability,
                &self.command,
                &arguments,
            )
            .await
        {
            Ok(()) => StatusUpdate::Applied,
            Err(err) => {
                warn!(status_device = %device_id, %label, error = %err, "status indicator update failed");
                StatusUpdate::Failed(err.message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dr_devices::MockDeviceClient;
    use serde_json::json;

    #[tokio::test]
    async fn absent_and_synthetic_ids_are_skipped() {
        let client = MockDeviceClient::new();
        let indicator = DeviceStatusIndicator::default();

        for id in [None, Some(""), Some("virtual-dr-device-id-1700000000000")] {
            assert_eq!(
                indicator.set_status(&client, id, StatusLabel::Pending).await,
                StatusUpdate::Skipped
            );
        }
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn real_device_receives_label() {
        let client = MockDeviceClient::new();
        let indicator = DeviceStatusIndicator::default();

        let update = indicator
            .set_status(&client, Some("status-1"), StatusLabel::Active)
            .await;
        assert_eq!(update, StatusUpdate::Applied);

        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].device_id, "status-1");
        assert_eq!(calls[0].component, "main");
        assert_eq!(calls[0].capability, "msg");
        assert_eq!(calls[0].command, "set");
        assert_eq!(calls[0].arguments, vec![json!("Active")]);
    }

    #[tokio::test]
    async fn padded_id_is_sent_trimmed() {
        let client = MockDeviceClient::new();
        let indicator = DeviceStatusIndicator::default();
        assert_eq!(indicator.backing_device(Some("  ")), None);
        assert_eq!(indicator.backing_device(Some(" virtual-dr-device-id-1 ")), None);

        let update = indicator
            .set_status(&client, Some("  status-1\n"), StatusLabel::Pending)
            .await;
        assert_eq!(update, StatusUpdate::Applied);
        assert_eq!(client.calls()[0].device_id, "status-1");
    }

    #[tokio::test]
    async fn failures_are_returned_as_data() {
        let client = MockDeviceClient::new();
        client.fail("status-1", "set", "request failed with status code 500");
        let update = DeviceStatusIndicator::default()
            .set_status(&client, Some("status-1"), StatusLabel::Pending)
            .await;
        assert_eq!(
            update,
            StatusUpdate::Failed("request failed with status code 500".into())
        );
    }
}
