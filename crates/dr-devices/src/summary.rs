//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Device command client and device document models."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{DeviceSnapshot, DeviceStatus, DEFAULT_COMPONENT};

const WASHER_ACTIVE_STATES: [&str; 5] = ["run", "running", "wash", "rinse", "spin"];

/// Condensed view of a managed device for the device listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    /// Device identifier.
    pub device_id: String,
    /// Label, falling back to the device name.
    pub label: Option<String>,
    /// Switch state, a washer cycle name, or `N/A`.
    pub switch: String,
    /// Instantaneous power draw; zero while switched off.
    pub power: f64,
    /// Accumulated energy reading.
    pub energy: f64,
    /// Component name → capability names.
    pub capabilities: IndexMap<String, Vec<String>>,
}

impl DeviceSummary {
    /// Derive the summary from the description and status documents.
    pub fn from_documents(device_id: &str, snapshot: &DeviceSnapshot, status: &DeviceStatus) -> Self {
        let mut switch = String::from("N/A");
        let mut is_off = false;

        if let Some(value) = status
            .capability(DEFAULT_COMPONENT, "switch")
            .and_then(|cap| attribute_value(cap, "switch"))
            .and_then(Value::as_str)
        {
            switch = value.to_owned();
            is_off = value == "off";
        }

        if let Some(machine) = status
            .capability(DEFAULT_COMPONENT, "washerOperatingState")
            .and_then(|cap| attribute_value(cap, "machineState"))
            .and_then(Value::as_str)
        {
            if WASHER_ACTIVE_STATES.contains(&machine) {
                is_off = false;
                switch = machine.to_owned();
            }
        }

        let mut power = status
            .find_capability("powerMeter")
            .and_then(|cap| attribute_value(cap, "power"))
            .and_then(reading)
            .unwrap_or(0.0);
        let mut energy = status
            .find_capability("energyMeter")
            .and_then(|cap| attribute_value(cap, "energy"))
            .and_then(reading)
            .unwrap_or(0.0);

        // Samsung OCF report overrides the standard meters when it carries values.
        if let Some(report) = status
            .find_capability("powerConsumptionReport")
            .and_then(|cap| attribute_value(cap, "powerConsumption"))
            .filter(|report| !report.is_null())
        {
            if let Some(reported) = report.get("power").and_then(reading) {
                power = reported;
            }
            if let Some(reported) = report.get("energy").and_then(reading) {
                energy = reported;
            }
        }

        if is_off {
            power = 0.0;
        }

        let capabilities = status
            .components
            .iter()
            .map(|(component, caps)| (component.clone(), caps.keys().cloned().collect()))
            .collect();

        Self {
            device_id: device_id.to_owned(),
            label: snapshot.display_name().map(str::to_owned),
            switch,
            power,
            energy,
            capabilities,
        }
    }
}

/// Meter values arrive as JSON numbers or, from some firmware, numeric strings.
fn reading(value: &Value) -> Option<f64> {
    match value {
        Value::String(text) => text.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        other => other.as_f64(),
    }
}

fn attribute_value<'a>(capability: &'a Value, attribute: &str) -> Option<&'a Value> {
    capability.get(attribute)?.get("value")
}
