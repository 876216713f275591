//! ---
//! ems_section: "04-configuration-orchestration"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "DR event state machine coordinating devices and deferred restores."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Deferred restores. The orchestrator only ever calls
//! [`RestoreScheduler::schedule`]; how the timer is kept is up to the
//! implementation.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dr_devices::{set_switch, SharedDeviceClient, SwitchState};
use dr_logging::{dr_error, dr_info, LogContext};
use dr_metrics::DrMetrics;
use dr_store::{RestoreEntry, RestoreQueue, StoreError};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Switch-on owed to one device once its delay elapses.
#[derive(Clone)]
pub struct RestoreTask {
    /// Installation the device belongs to.
    pub installation_id: String,
    /// Device to switch back on.
    pub device_id: String,
    /// DR event that switched the device off, unknown for recovered entries.
    pub event_id: Option<String>,
    /// Run that switched the device off, unknown for recovered entries.
    pub run_id: Option<String>,
    /// Client authorised for the installation.
    pub client: SharedDeviceClient,
}

impl RestoreTask {
    fn log_context(&self) -> LogContext<'_> {
        let mut ctx = LogContext::new()
            .with_installation(&self.installation_id)
            .with_device(&self.device_id)
            .with_phase("restore");
        if let Some(event) = self.event_id.as_deref() {
            ctx = ctx.with_event(event);
        }
        if let Some(run) = self.run_id.as_deref() {
            ctx = ctx.with_run(run);
        }
        ctx
    }
}

impl std::fmt::Debug for RestoreTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoreTask")
            .field("installation_id", &self.installation_id)
            .field("device_id", &self.device_id)
            .field("event_id", &self.event_id)
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

/// Arranges a detached switch-on after a delay.
///
/// `schedule` must return without waiting for the restore. Failures of the
/// restore itself are logged and counted by the implementation.
pub trait RestoreScheduler: Send + Sync + 'static {
    /// Switch `task.device_id` on once `delay` has elapsed.
    fn schedule(&self, task: RestoreTask, delay: Duration);
}

async fn fire(task: &RestoreTask, metrics: Option<&DrMetrics>) -> bool {
    let ctx = task.log_context();
    dr_info!(context = ctx.clone(), "restoring device");
    let result = set_switch(task.client.as_ref(), &task.device_id, SwitchState::On).await;
    let success = result.is_ok();
    match result {
        Ok(()) => dr_info!(context = ctx, "device restored"),
        Err(err) => dr_error!(context = ctx, "restore failed: {}", err),
    }
    if let Some(metrics) = metrics {
        metrics.record_device_command(SwitchState::On.command(), success);
        metrics.record_restore(if success { "succeeded" } else { "failed" });
    }
    success
}

/// In-memory timers; outstanding restores are lost when the process exits.
#[derive(Debug, Clone, Default)]
pub struct TimerRestoreScheduler {
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    metrics: Option<DrMetrics>,
}

impl TimerRestoreScheduler {
    /// Scheduler without metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count restores in `metrics`.
    pub fn with_metrics(mut self, metrics: DrMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Restores armed but not yet finished.
    pub fn outstanding(&self) -> usize {
        self.tasks
            .lock()
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Wait until every armed restore, including ones armed meanwhile, has finished.
    pub async fn wait_idle(&self) {
        loop {
            let handles = std::mem::take(&mut *self.tasks.lock());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(err) = handle.await {
                    warn!(error = %err, "restore task join error");
                }
            }
        }
    }

    fn arm<F>(&self, delay: Duration, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            work.await;
        });
        let mut tasks = self.tasks.lock();
        tasks.retain(|handle| !handle.is_finished());
        tasks.push(handle);
    }
}

impl RestoreScheduler for TimerRestoreScheduler {
    fn schedule(&self, task: RestoreTask, delay: Duration) {
        dr_info!(
            context = task.log_context(),
            "restore scheduled in {:.1}s",
            delay.as_secs_f64()
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_restore("scheduled");
        }
        let metrics = self.metrics.clone();
        self.arm(delay, async move {
            fire(&task, metrics.as_ref()).await;
        });
    }
}

/// Timers backed by a persisted [`RestoreQueue`] so restores survive restarts.
///
/// Each restore is written to the queue before its timer is armed and
/// removed once it fired. A device has at most one pending restore per
/// installation: scheduling it again moves the due time and the older timer
/// stands down.
#[derive(Debug, Clone)]
pub struct DurableRestoreScheduler {
    queue: Arc<RestoreQueue>,
    timers: TimerRestoreScheduler,
    metrics: Option<DrMetrics>,
}

impl DurableRestoreScheduler {
    /// Use an already opened queue.
    pub fn new(queue: Arc<RestoreQueue>) -> Self {
        Self {
            queue,
            timers: TimerRestoreScheduler::new(),
            metrics: None,
        }
    }

    /// Open (or create) the queue document at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Arc::new(RestoreQueue::open(path)?)))
    }

    /// Count restores in `metrics`.
    pub fn with_metrics(mut self, metrics: DrMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Backing queue.
    pub fn queue(&self) -> &Arc<RestoreQueue> {
        &self.queue
    }

    /// Restores armed but not yet finished.
    pub fn outstanding(&self) -> usize {
        self.timers.outstanding()
    }

    /// Wait until every armed restore has finished.
    pub async fn wait_idle(&self) {
        self.timers.wait_idle().await
    }

    /// Re-arm every persisted entry; overdue entries fire immediately.
    ///
    /// `resolve` maps an installation id to a client carrying its token.
    /// Entries whose installation can no longer be resolved are dropped.
    /// Returns the number of restores re-armed.
    pub fn recover<F>(&self, mut resolve: F) -> usize
    where
        F: FnMut(&str) -> Option<SharedDeviceClient>,
    {
        let now = Utc::now();
        let mut armed = 0;
        for entry in self.queue.pending() {
            let Some(client) = resolve(&entry.installation_id) else {
                warn!(
                    installation = %entry.installation_id,
                    device = %entry.device_id,
                    "dropping persisted restore for unknown installation"
                );
                if let Err(err) = self.queue.complete(&entry) {
                    warn!(error = %err, "failed to remove restore entry");
                }
                self.count("dropped");
                continue;
            };
            let delay = (entry.due_at - now).to_std().unwrap_or(Duration::ZERO);
            let task = RestoreTask {
                installation_id: entry.installation_id.clone(),
                device_id: entry.device_id.clone(),
                event_id: None,
                run_id: None,
                client,
            };
            debug!(device = %entry.device_id, delay_ms = delay.as_millis() as u64, "re-arming persisted restore");
            self.arm_entry(entry, task, delay);
            self.count("recovered");
            armed += 1;
        }
        info!(armed, path = %self.queue.path().display(), "restore queue recovered");
        armed
    }

    fn count(&self, status: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_restore(status);
        }
    }

    fn arm_entry(&self, entry: RestoreEntry, task: RestoreTask, delay: Duration) {
        let queue = self.queue.clone();
        let metrics = self.metrics.clone();
        self.timers.arm(delay, async move {
            if !queue.is_current(&entry) {
                debug!(device = %entry.device_id, "restore superseded by a later schedule");
                if let Some(metrics) = &metrics {
                    metrics.record_restore("superseded");
                }
                return;
            }
            fire(&task, metrics.as_ref()).await;
            if let Err(err) = queue.complete(&entry) {
                warn!(device = %entry.device_id, error = %err, "failed to remove fired restore from queue");
            }
        });
    }
}

fn due_at(delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl RestoreScheduler for DurableRestoreScheduler {
    fn schedule(&self, task: RestoreTask, delay: Duration) {
        let entry = RestoreEntry::new(
            task.installation_id.clone(),
            task.device_id.clone(),
            due_at(delay),
        );
        match self.queue.upsert(entry.clone()) {
            Ok(Some(previous)) => {
                debug!(device = %entry.device_id, previous_due = %previous.due_at, "pending restore rescheduled")
            }
            Ok(None) => {}
            Err(err) => dr_error!(
                context = task.log_context(),
                "failed to persist restore, keeping it in memory only: {}",
                err
            ),
        }
        dr_info!(
            context = task.log_context(),
            "durable restore scheduled in {:.1}s",
            delay.as_secs_f64()
        );
        self.count("scheduled");
        self.arm_entry(entry, task, delay);
    }
}
