//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "HTTP entry points for DR events, device listing and opt-out."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dr_orchestrator::{cancellation_pair, CancelHandle, RunCancellation};
use parking_lot::Mutex;

/// Runs currently inside `POST /dr-event`, keyed by event id.
#[derive(Debug, Default)]
pub(crate) struct InFlightRuns {
    next_id: AtomicU64,
    runs: Mutex<HashMap<String, Vec<(u64, CancelHandle)>>>,
}

impl InFlightRuns {
    /// Track a new run for `event_id` until the returned guard drops.
    pub(crate) fn register(self: &Arc<Self>, event_id: &str) -> (RunRegistration, RunCancellation) {
        let (handle, cancellation) = cancellation_pair();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.runs
            .lock()
            .entry(event_id.to_owned())
            .or_default()
            .push((id, handle));
        let registration = RunRegistration {
            runs: Arc::clone(self),
            event_id: event_id.to_owned(),
            id,
        };
        (registration, cancellation)
    }

    /// Cancel every tracked run for `event_id`; returns how many were signalled.
    pub(crate) fn cancel(&self, event_id: &str) -> usize {
        let runs = self.runs.lock();
        match runs.get(event_id) {
            Some(handles) => {
                for (_, handle) in handles {
                    handle.cancel();
                }
                handles.len()
            }
            None => 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.runs.lock().values().map(Vec::len).sum()
    }

    fn remove(&self, event_id: &str, id: u64) {
        let mut runs = self.runs.lock();
        if let Some(handles) = runs.get_mut(event_id) {
            handles.retain(|(candidate, _)| *candidate != id);
            if handles.is_empty() {
                runs.remove(event_id);
            }
        }
    }
}

/// Removes its run from [`InFlightRuns`] on drop.
#[derive(Debug)]
pub(crate) struct RunRegistration {
    runs: Arc<InFlightRuns>,
    event_id: String,
    id: u64,
}

impl Drop for RunRegistration {
    fn drop(&mut self) {
        self.runs.remove(&self.event_id, self.id);
    }
}
