//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Device command client and device document models."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::model::{DeviceSnapshot, DeviceStatus, SwitchState, DEFAULT_COMPONENT, SWITCH_CAPABILITY};

/// Failure talking to the device-control API.
///
/// Network, timeout, HTTP status, and decoding failures all collapse into a
/// message so callers can record them as data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CommandError {
    /// Human readable description of the failure.
    pub message: String,
}

impl CommandError {
    /// Construct an error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for CommandError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::new(format!("timeout: {err}"));
        }
        Self::new(err.to_string())
    }
}

/// Operations offered by the external device-control service.
///
/// Implementations must be safe to share between the orchestrator and any
/// number of outstanding restore tasks.
#[async_trait]
pub trait DeviceCommandClient: Send + Sync + 'static {
    /// Send one command to one device.
    async fn execute(
        &self,
        device_id: &str,
        component: &str,
        capability: &str,
        command: &str,
        arguments: &[Value],
    ) -> Result<(), CommandError>;

    /// Fetch the device description.
    async fn get(&self, device_id: &str) -> Result<DeviceSnapshot, CommandError>;

    /// Fetch the current attribute values of every component.
    async fn status(&self, device_id: &str) -> Result<DeviceStatus, CommandError>;
}

/// Shared handle passed between the orchestrator and the restore tasks.
pub type SharedDeviceClient = Arc<dyn DeviceCommandClient>;

/// Switch a device on or off through the `main` component.
pub async fn set_switch(
    client: &dyn DeviceCommandClient,
    device_id: &str,
    state: SwitchState,
) -> Result<(), CommandError> {
    client
        .execute(
            device_id,
            DEFAULT_COMPONENT,
            SWITCH_CAPABILITY,
            state.command(),
            &[],
        )
        .await
}
