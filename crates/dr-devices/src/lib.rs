//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Device command client and device document models."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Thin typed access to the external device-control service.
//!
//! Every component that talks to devices goes through [`DeviceCommandClient`]:
//! the orchestrator's execute loop, the deferred restores, the status
//! indicator, and the device listing endpoint. The HTTP implementation
//! performs exactly one request per call and folds every transport or status
//! failure into a [`CommandError`].
#![warn(missing_docs)]

pub mod client;
pub mod factory;
pub mod http;
pub mod mock;
pub mod model;
pub mod summary;

pub use client::{set_switch, CommandError, DeviceCommandClient, SharedDeviceClient};
pub use factory::{ClientFactory, HttpClientFactory, StaticClientFactory};
pub use http::HttpDeviceClient;
pub use mock::{MockDeviceClient, RecordedCommand};
pub use model::{
    CommandBatch, DeviceCommand, DeviceSnapshot, DeviceStatus, ManagedDevice, SwitchState,
    DEFAULT_COMPONENT, SWITCH_CAPABILITY,
};
pub use summary::DeviceSummary;
