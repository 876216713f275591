//! ---
//! ems_section: "04-configuration-orchestration"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "DR event state machine coordinating devices and deferred restores."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use dr_devices::{ManagedDevice, SharedDeviceClient};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Precondition violations, the only errors [`crate::DrOrchestrator::process`] returns.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DrError {
    /// The signal is missing a required field or carries an unusable value.
    #[error("invalid signal: {0}")]
    InvalidSignal(String),
    /// The execution context cannot be acted upon.
    #[error("invalid context: {0}")]
    InvalidContext(String),
}

/// Inbound demand-response signal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrSignal {
    /// Identifier assigned by the utility.
    #[serde(default)]
    pub event_id: String,
    /// Severity level, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<f64>,
    /// Seconds before each controlled device is restored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl DrSignal {
    /// Signal with only an event id.
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            ..Default::default()
        }
    }

    /// Set the restore delay in seconds.
    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    /// Set the severity level.
    pub fn with_level(mut self, level: f64) -> Self {
        self.level = Some(level);
        self
    }

    /// Check the fields the orchestrator relies on.
    pub fn validate(&self) -> Result<(), DrError> {
        if self.event_id.trim().is_empty() {
            return Err(DrError::InvalidSignal("eventId is required".into()));
        }
        if let Some(level) = self.level {
            if !level.is_finite() {
                return Err(DrError::InvalidSignal("level must be a finite number".into()));
            }
        }
        if let Some(duration) = self.duration {
            if !duration.is_finite() {
                return Err(DrError::InvalidSignal(
                    "duration must be a finite number".into(),
                ));
            }
            Duration::try_from_secs_f64(duration.max(0.0)).map_err(|_| {
                DrError::InvalidSignal(format!("duration {duration} is out of range"))
            })?;
        }
        Ok(())
    }

    /// Delay before restoring a device; negative durations clamp to zero.
    pub fn restore_delay(&self, default: Duration) -> Result<Duration, DrError> {
        match self.duration {
            None => Ok(default),
            Some(seconds) => Duration::try_from_secs_f64(seconds.max(0.0)).map_err(|_| {
                DrError::InvalidSignal(format!("duration {seconds} is out of range"))
            }),
        }
    }
}

/// Everything one run needs besides the signal, resolved by the caller.
#[derive(Clone)]
pub struct DrContext {
    /// Installation the devices and token belong to.
    pub installation_id: String,
    /// Client authorised for this installation.
    pub client: SharedDeviceClient,
    /// Pseudo-device reflecting the DR phase, if any.
    pub status_device_id: Option<String>,
    /// Devices to shed, in registry order.
    pub managed_devices: Vec<ManagedDevice>,
}

impl DrContext {
    /// Build a context without a status device.
    pub fn new(
        installation_id: impl Into<String>,
        client: SharedDeviceClient,
        managed_devices: Vec<ManagedDevice>,
    ) -> Self {
        Self {
            installation_id: installation_id.into(),
            client,
            status_device_id: None,
            managed_devices,
        }
    }

    /// Attach the status indicator device.
    pub fn with_status_device(mut self, status_device_id: impl Into<String>) -> Self {
        self.status_device_id = Some(status_device_id.into());
        self
    }

    /// Check that every device can be addressed.
    pub fn validate(&self) -> Result<(), DrError> {
        if self.installation_id.trim().is_empty() {
            return Err(DrError::InvalidContext("installation id is required".into()));
        }
        if let Some(index) = self
            .managed_devices
            .iter()
            .position(|device| device.device_id.trim().is_empty())
        {
            return Err(DrError::InvalidContext(format!(
                "managed device at position {index} has no deviceId"
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for DrContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrContext")
            .field("installation_id", &self.installation_id)
            .field("status_device_id", &self.status_device_id)
            .field("managed_devices", &self.managed_devices)
            .finish_non_exhaustive()
    }
}
