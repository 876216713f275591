//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Device command client and device document models."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Component addressed when a caller does not name one.
pub const DEFAULT_COMPONENT: &str = "main";

/// Capability carrying the on/off switch commands.
pub const SWITCH_CAPABILITY: &str = "switch";

/// Device registered for DR control during installation.
///
/// Stored as the platform's whole device configuration object; fields other
/// than `deviceId` (component, permissions, ...) are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedDevice {
    /// Identifier understood by the device-control API.
    pub device_id: String,
    /// Remaining installation-time configuration.
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

impl ManagedDevice {
    /// Construct a managed device with no extra configuration.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            config: Map::new(),
        }
    }

    /// Attach one configuration field.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

/// Target state for the switch capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    /// Load restored.
    On,
    /// Load shed.
    Off,
}

impl SwitchState {
    /// Command verb understood by the switch capability.
    pub fn command(&self) -> &'static str {
        match self {
            SwitchState::On => "on",
            SwitchState::Off => "off",
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

/// A single command entry of the device API wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommand {
    /// Device component, `main` for most devices.
    pub component: String,
    /// Capability that owns the command.
    pub capability: String,
    /// Command verb.
    pub command: String,
    /// Positional command arguments.
    #[serde(default)]
    pub arguments: Vec<Value>,
}

/// Request body posted to `/devices/{id}/commands`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandBatch {
    /// Commands executed in order by the device API.
    pub commands: Vec<DeviceCommand>,
}

impl CommandBatch {
    /// Wrap one command, the only shape this crate ever sends.
    pub fn single(command: DeviceCommand) -> Self {
        Self {
            commands: vec![command],
        }
    }
}

/// Device description returned by `GET /devices/{id}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    /// Device identifier echoed by the API.
    #[serde(default)]
    pub device_id: String,
    /// User-assigned label.
    #[serde(default)]
    pub label: Option<String>,
    /// Manufacturer or profile name.
    #[serde(default)]
    pub name: Option<String>,
    /// Remaining fields of the document, preserved as-is.
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl DeviceSnapshot {
    /// Label shown to users, falling back to the device name.
    pub fn display_name(&self) -> Option<&str> {
        self.label.as_deref().or(self.name.as_deref())
    }
}

/// Attribute document returned by `GET /devices/{id}/status`.
///
/// `components` maps a component name to its capabilities, and each
/// capability to its attribute objects (`{"value": ..., "unit": ...}`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Component → capability → attribute → attribute document.
    #[serde(default)]
    pub components: IndexMap<String, IndexMap<String, Value>>,
}

impl DeviceStatus {
    /// Look up a capability on a named component.
    pub fn capability(&self, component: &str, capability: &str) -> Option<&Value> {
        self.components.get(component)?.get(capability)
    }

    /// First capability with the given name on any component, in document order.
    pub fn find_capability(&self, capability: &str) -> Option<&Value> {
        self.components
            .values()
            .find_map(|capabilities| capabilities.get(capability))
    }
}
