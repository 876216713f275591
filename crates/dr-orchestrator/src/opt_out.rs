//! ---
//! ems_section: "04-configuration-orchestration"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "DR event state machine coordinating devices and deferred restores."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use async_trait::async_trait;
use dr_store::{load_installation, SharedInstallationStore};
use tracing::warn;

use crate::signal::DrContext;

/// Source of the user's opt-out decision, consulted once after the window.
#[async_trait]
pub trait OptOutSource: Send + Sync + 'static {
    /// Whether the installation behind `ctx` opted out of this event.
    async fn is_opted_out(&self, ctx: &DrContext) -> bool;
}

/// Always proceeds with load control.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverOptedOut;

#[async_trait]
impl OptOutSource for NeverOptedOut {
    async fn is_opted_out(&self, _ctx: &DrContext) -> bool {
        false
    }
}

/// Reads the persisted `optedOut` flag of the installation.
///
/// An absent flag, or a store that cannot be read, counts as not opted out.
#[derive(Clone)]
pub struct StoredOptOut {
    store: SharedInstallationStore,
}

impl StoredOptOut {
    /// Read flags from `store`.
    pub fn new(store: SharedInstallationStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OptOutSource for StoredOptOut {
    async fn is_opted_out(&self, ctx: &DrContext) -> bool {
        match load_installation(&self.store, &ctx.installation_id).await {
            Ok(state) => state.is_opted_out(),
            Err(err) => {
                warn!(
                    installation = %ctx.installation_id,
                    error = %err,
                    "unable to read opt-out flag; proceeding"
                );
                false
            }
        }
    }
}
