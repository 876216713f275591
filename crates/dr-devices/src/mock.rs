//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Device command client and device document models."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::{sleep, Instant};

use crate::client::{CommandError, DeviceCommandClient};
use crate::model::{DeviceSnapshot, DeviceStatus};

/// Command observed by the [`MockDeviceClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCommand {
    /// Target device.
    pub device_id: String,
    /// Component the command addressed.
    pub component: String,
    /// Capability the command addressed.
    pub capability: String,
    /// Command verb.
    pub command: String,
    /// Positional arguments.
    pub arguments: Vec<Value>,
    /// Runtime instant the command was received (follows paused test clocks).
    pub at: Instant,
}

/// In-memory device API for tests and dry runs.
///
/// Every command is recorded; failures can be scripted per device and
/// command verb, and an artificial latency can be applied to each call.
#[derive(Debug, Default)]
pub struct MockDeviceClient {
    calls: Mutex<Vec<RecordedCommand>>,
    failures: Mutex<HashMap<(String, String), String>>,
    snapshots: Mutex<HashMap<String, DeviceSnapshot>>,
    statuses: Mutex<HashMap<String, DeviceStatus>>,
    latency: Mutex<HashMap<String, Duration>>,
}

impl MockDeviceClient {
    /// Create a mock where every command succeeds immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `command` on `device_id` fail with `message`.
    pub fn fail(&self, device_id: &str, command: &str, message: &str) -> &Self {
        self.failures
            .lock()
            .insert((device_id.to_owned(), command.to_owned()), message.to_owned());
        self
    }

    /// Delay every command sent to `device_id`.
    pub fn delay(&self, device_id: &str, latency: Duration) -> &Self {
        self.latency.lock().insert(device_id.to_owned(), latency);
        self
    }

    /// Serve `snapshot` for `GET /devices/{id}`.
    pub fn with_snapshot(&self, device_id: &str, snapshot: DeviceSnapshot) -> &Self {
        self.snapshots.lock().insert(device_id.to_owned(), snapshot);
        self
    }

    /// Serve `status` for `GET /devices/{id}/status`.
    pub fn with_status(&self, device_id: &str, status: DeviceStatus) -> &Self {
        self.statuses.lock().insert(device_id.to_owned(), status);
        self
    }

    /// Every command received so far, in arrival order.
    pub fn calls(&self) -> Vec<RecordedCommand> {
        self.calls.lock().clone()
    }

    /// Commands received for one device and verb.
    pub fn calls_for(&self, device_id: &str, command: &str) -> Vec<RecordedCommand> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.device_id == device_id && call.command == command)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DeviceCommandClient for MockDeviceClient {
    async fn execute(
        &self,
        device_id: &str,
        component: &str,
        capability: &str,
        command: &str,
        arguments: &[Value],
    ) -> Result<(), CommandError> {
        let latency = self.latency.lock().get(device_id).copied();
        if let Some(latency) = latency {
            sleep(latency).await;
        }
        self.calls.lock().push(RecordedCommand {
            device_id: device_id.to_owned(),
            component: component.to_owned(),
            capability: capability.to_owned(),
            command: command.to_owned(),
            arguments: arguments.to_vec(),
            at: Instant::now(),
        });
        let failure = self
            .failures
            .lock()
            .get(&(device_id.to_owned(), command.to_owned()))
            .cloned();
        match failure {
            Some(message) => Err(CommandError::new(message)),
            None => Ok(()),
        }
    }

    async fn get(&self, device_id: &str) -> Result<DeviceSnapshot, CommandError> {
        self.snapshots
            .lock()
            .get(device_id)
            .cloned()
            .ok_or_else(|| CommandError::new("request failed with status code 404"))
    }

    async fn status(&self, device_id: &str) -> Result<DeviceStatus, CommandError> {
        self.statuses
            .lock()
            .get(device_id)
            .cloned()
            .ok_or_else(|| CommandError::new("request failed with status code 404"))
    }
}
