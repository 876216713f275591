//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Installation state repository and restore queue persistence."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::installation::InstallationState;
use crate::{Result, StoreError};

/// Repository for per-installation state.
pub trait InstallationStore: Send + Sync + 'static {
    /// Load the state for `installation_id`; a missing record loads as the default state.
    fn load(&self, installation_id: &str) -> Result<InstallationState>;

    /// Replace the state for `installation_id`.
    fn save(&self, installation_id: &str, state: &InstallationState) -> Result<()>;
}

/// Shared handle used by the HTTP layer and the daemon.
pub type SharedInstallationStore = Arc<dyn InstallationStore>;

/// [`InstallationStore::load`] on the blocking pool, for callers on async workers.
pub async fn load_installation(
    store: &SharedInstallationStore,
    installation_id: &str,
) -> Result<InstallationState> {
    let store = store.clone();
    let installation_id = installation_id.to_owned();
    tokio::task::spawn_blocking(move || store.load(&installation_id)).await?
}

/// [`InstallationStore::save`] on the blocking pool.
pub async fn save_installation(
    store: &SharedInstallationStore,
    installation_id: &str,
    state: InstallationState,
) -> Result<()> {
    let store = store.clone();
    let installation_id = installation_id.to_owned();
    tokio::task::spawn_blocking(move || store.save(&installation_id, &state)).await?
}

/// One pretty-printed JSON document per installation under a directory.
#[derive(Debug, Clone)]
pub struct FileInstallationStore {
    directory: PathBuf,
}

impl FileInstallationStore {
    /// Store documents under `directory`, created on first save.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Directory holding the installation documents.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, installation_id: &str) -> Result<PathBuf> {
        let valid = !installation_id.is_empty()
            && installation_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !installation_id.starts_with('.');
        if !valid {
            return Err(StoreError::InvalidInstallationId(installation_id.to_owned()));
        }
        Ok(self.directory.join(format!("{installation_id}.json")))
    }
}

impl InstallationStore for FileInstallationStore {
    fn load(&self, installation_id: &str) -> Result<InstallationState> {
        let path = self.path_for(installation_id)?;
        if !path.exists() {
            debug!(installation = %installation_id, path = %path.display(), "no stored installation state");
            return Ok(InstallationState::default());
        }
        let bytes = fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn save(&self, installation_id: &str, state: &InstallationState) -> Result<()> {
        let path = self.path_for(installation_id)?;
        fs::create_dir_all(&self.directory)?;
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, state)?;
        writer.flush()?;
        debug!(installation = %installation_id, path = %path.display(), "installation state saved");
        Ok(())
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryInstallationStore {
    states: Mutex<HashMap<String, InstallationState>>,
}

impl MemoryInstallationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with one installation.
    pub fn with_state(installation_id: &str, state: InstallationState) -> Self {
        let store = Self::new();
        store
            .states
            .lock()
            .insert(installation_id.to_owned(), state);
        store
    }
}

impl InstallationStore for MemoryInstallationStore {
    fn load(&self, installation_id: &str) -> Result<InstallationState> {
        Ok(self
            .states
            .lock()
            .get(installation_id)
            .cloned()
            .unwrap_or_default())
    }

    fn save(&self, installation_id: &str, state: &InstallationState) -> Result<()> {
        self.states
            .lock()
            .insert(installation_id.to_owned(), state.clone());
        Ok(())
    }
}
