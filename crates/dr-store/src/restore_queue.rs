//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Installation state repository and restore queue persistence."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Result;

/// Current restore queue document version.
pub const QUEUE_VERSION: u16 = 1;

/// Restore that has been scheduled but not yet fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreEntry {
    /// Device to switch back on.
    pub device_id: String,
    /// Installation whose token is used for the restore.
    pub installation_id: String,
    /// Wall-clock time the restore becomes due.
    pub due_at: DateTime<Utc>,
}

impl RestoreEntry {
    /// Construct an entry.
    pub fn new(
        installation_id: impl Into<String>,
        device_id: impl Into<String>,
        due_at: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            installation_id: installation_id.into(),
            due_at,
        }
    }

    fn same_target(&self, other: &RestoreEntry) -> bool {
        self.device_id == other.device_id && self.installation_id == other.installation_id
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueDocument {
    version: u16,
    updated_at: DateTime<Utc>,
    entries: Vec<RestoreEntry>,
}

/// Persisted set of pending restores.
///
/// Holds at most one entry per installation and device. Every mutation is
/// written through to disk while the lock is held, so concurrent schedulers
/// never interleave partial documents.
#[derive(Debug)]
pub struct RestoreQueue {
    path: PathBuf,
    entries: Mutex<Vec<RestoreEntry>>,
}

impl RestoreQueue {
    /// Open the queue at `path`, loading any entries left by a previous process.
    pub fn open(path: &Path) -> Result<Self> {
        let entries = if path.exists() && fs::metadata(path)?.len() > 0 {
            let bytes = fs::read(path)?;
            let document: QueueDocument = serde_json::from_slice(&bytes)?;
            document.entries
        } else {
            Vec::new()
        };
        debug!(path = %path.display(), pending = entries.len(), "restore queue opened");
        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    /// Location of the queue document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `entry`, replacing any pending entry for the same device.
    ///
    /// Returns the replaced entry, if one existed.
    pub fn upsert(&self, entry: RestoreEntry) -> Result<Option<RestoreEntry>> {
        let mut entries = self.entries.lock();
        let replaced = match entries.iter().position(|existing| existing.same_target(&entry)) {
            Some(index) => Some(std::mem::replace(&mut entries[index], entry)),
            None => {
                entries.push(entry);
                None
            }
        };
        self.persist(&entries)?;
        Ok(replaced)
    }

    /// Remove `entry` once its restore has fired.
    ///
    /// Only an exact match is removed, so a timer armed for an entry that was
    /// since replaced leaves the newer entry in place. Returns whether an
    /// entry was removed.
    pub fn complete(&self, entry: &RestoreEntry) -> Result<bool> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|existing| existing != entry);
        if entries.len() == before {
            return Ok(false);
        }
        self.persist(&entries)?;
        Ok(true)
    }

    /// Whether `entry` is still the pending entry for its device.
    pub fn is_current(&self, entry: &RestoreEntry) -> bool {
        self.entries.lock().iter().any(|existing| existing == entry)
    }

    /// Snapshot of every pending entry.
    pub fn pending(&self) -> Vec<RestoreEntry> {
        self.entries.lock().clone()
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no restores are pending.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn persist(&self, entries: &[RestoreEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let document = QueueDocument {
            version: QUEUE_VERSION,
            updated_at: Utc::now(),
            entries: entries.to_vec(),
        };
        let staging = self.path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&staging)?);
            serde_json::to_writer_pretty(&mut writer, &document)?;
            writer.flush()?;
        }
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}
