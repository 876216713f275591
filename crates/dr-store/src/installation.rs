//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Installation state repository and restore queue persistence."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashSet;

use chrono::Utc;
use dr_devices::ManagedDevice;
use serde::{Deserialize, Serialize};

/// State captured when the platform installs or updates the app.
///
/// Every field is optional in the persisted document; an installation that
/// was never configured loads as [`InstallationState::default`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationState {
    /// Bearer token for the device-control API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Platform location the devices belong to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    /// Ordered registry of devices under DR control.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_devices: Option<Vec<ManagedDevice>>,
    /// Pseudo-device used to surface the DR phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dr_status_device_id: Option<String>,
    /// User opt-out decision; absent means the user has not opted out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opted_out: Option<bool>,
}

impl InstallationState {
    /// Both the device registry and the status device id have been recorded.
    pub fn is_configured(&self) -> bool {
        self.managed_devices.is_some() && self.dr_status_device_id.is_some()
    }

    /// Managed devices, or an empty slice when none were recorded.
    pub fn devices(&self) -> &[ManagedDevice] {
        self.managed_devices.as_deref().unwrap_or(&[])
    }

    /// Effective opt-out flag.
    pub fn is_opted_out(&self) -> bool {
        self.opted_out.unwrap_or(false)
    }
}

/// Merge several device selections into one registry.
///
/// Devices are de-duplicated by id; the first occurrence keeps its position
/// and the configuration of the last occurrence wins.
pub fn merge_device_groups<I, G>(groups: I) -> Vec<ManagedDevice>
where
    I: IntoIterator<Item = G>,
    G: IntoIterator<Item = ManagedDevice>,
{
    let mut merged: Vec<ManagedDevice> = Vec::new();
    let mut seen = HashSet::new();
    for device in groups.into_iter().flatten() {
        if seen.insert(device.device_id.clone()) {
            merged.push(device);
        } else if let Some(existing) = merged
            .iter_mut()
            .find(|existing| existing.device_id == device.device_id)
        {
            *existing = device;
        }
    }
    merged
}

/// Placeholder status device id used when no real indicator device exists.
pub fn synthetic_status_device_id(prefix: &str) -> String {
    format!("{prefix}dr-device-id-{}", Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_document_is_unconfigured() {
        let state: InstallationState = serde_json::from_value(json!({})).unwrap();
        assert_eq!(state, InstallationState::default());
        assert!(!state.is_configured());
        assert!(!state.is_opted_out());
        assert!(state.devices().is_empty());
    }

    #[test]
    fn reads_camel_case_document() {
        let state: InstallationState = serde_json::from_value(json!({
            "token": "tok",
            "locationId": "loc",
            "managedDevices": [{"deviceId": "d1"}, {"deviceId": "d2", "componentId": "main"}],
            "drStatusDeviceId": "virtual-dr-device-id-1",
            "optedOut": true
        }))
        .unwrap();
        assert!(state.is_configured());
        assert!(state.is_opted_out());
        assert_eq!(state.devices().len(), 2);
        assert_eq!(state.devices()[1].config["componentId"], json!("main"));
    }

    #[test]
    fn absent_fields_are_not_written() {
        let state = InstallationState {
            token: Some("tok".into()),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&state).unwrap(), json!({"token": "tok"}));
    }

    #[test]
    fn merge_keeps_first_position_and_last_config() {
        let switches = vec![ManagedDevice::new("a"), ManagedDevice::new("b")];
        let meters = vec![
            ManagedDevice::new("c"),
            ManagedDevice::new("a").with_field("group", json!("meters")),
        ];
        let merged = merge_device_groups([switches, meters]);
        let ids: Vec<_> = merged.iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(merged[0].config["group"], json!("meters"));
    }

    #[test]
    fn synthetic_id_carries_prefix() {
        let id = synthetic_status_device_id("virtual-");
        assert!(id.starts_with("virtual-dr-device-id-"));
        assert!(id["virtual-dr-device-id-".len()..].parse::<i64>().is_ok());
    }
}
