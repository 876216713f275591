//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Installation state repository and restore queue persistence."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Persistence for the state DR Relay keeps between requests: the per
//! installation configuration (token, managed devices, status device) and the
//! queue of restores that must survive a restart.

/// Result alias used throughout the store crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error type for the store subsystem.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Wrapper for IO errors encountered while reading/writing store files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Installation identifiers become file names and must stay inside the store directory.
    #[error("invalid installation id '{0}'")]
    InvalidInstallationId(String),
    /// The blocking task running a store call panicked or was cancelled.
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub mod installation;
pub mod restore_queue;
pub mod store;

pub use installation::{merge_device_groups, synthetic_status_device_id, InstallationState};
pub use restore_queue::{RestoreEntry, RestoreQueue};
pub use store::{
    load_installation, save_installation, FileInstallationStore, InstallationStore,
    MemoryInstallationStore, SharedInstallationStore,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_id_error_names_the_id() {
        let err = StoreError::InvalidInstallationId("../etc".into());
        assert_eq!(format!("{err}"), "invalid installation id '../etc'");
    }
}
