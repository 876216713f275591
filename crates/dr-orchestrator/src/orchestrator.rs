//! ---
//! ems_section: "04-configuration-orchestration"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "DR event state machine coordinating devices and deferred restores."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use dr_common::OrchestratorConfig;
use dr_devices::{set_switch, SharedDeviceClient, SwitchState};
use dr_logging::{dr_info, dr_warn, log_system_event, LogContext, SystemEventOutcome};
use dr_metrics::DrMetrics;
use futures::stream::{self, StreamExt};
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use crate::cancel::RunCancellation;
use crate::notify::{LogNotifier, Notification, NotificationOutcome, Notifier};
use crate::opt_out::{NeverOptedOut, OptOutSource};
use crate::outcome::{AbortReason, CompletedRun, DeviceCommandResult, DrOutcome, DrPhase};
use crate::restore::{RestoreScheduler, RestoreTask};
use crate::signal::{DrContext, DrError, DrSignal};
use crate::status::{DeviceStatusIndicator, StatusIndicator, StatusLabel, StatusUpdate};

/// Message carried by every completed run.
pub const COMPLETED_MESSAGE: &str = "DR Event Processed";

/// Timing and fan-out knobs of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Wait between notification and the opt-out decision.
    pub opt_out_window: Duration,
    /// Restore delay used when the signal carries no duration.
    pub default_restore_delay: Duration,
    /// Switch-off commands in flight at once; 1 issues them one by one.
    pub execute_concurrency: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for OrchestratorSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            opt_out_window: config.opt_out_window,
            default_restore_delay: config.default_restore_delay,
            execute_concurrency: config.execute_concurrency.max(1),
        }
    }
}

/// Transient state of one invocation.
#[derive(Debug)]
pub struct DrRun {
    run_id: String,
    event_id: String,
    installation_id: String,
    phase: DrPhase,
    history: Vec<DrPhase>,
    results: Vec<DeviceCommandResult>,
    started: Instant,
}

impl DrRun {
    fn new(signal: &DrSignal, ctx: &DrContext) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            event_id: signal.event_id.clone(),
            installation_id: ctx.installation_id.clone(),
            phase: DrPhase::Received,
            history: vec![DrPhase::Received],
            results: Vec::new(),
            started: Instant::now(),
        }
    }

    /// Identifier assigned when the run started.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Current phase.
    pub fn phase(&self) -> DrPhase {
        self.phase
    }

    /// Every phase entered so far, in order.
    pub fn history(&self) -> &[DrPhase] {
        &self.history
    }

    /// Results recorded by the execute phase.
    pub fn results(&self) -> &[DeviceCommandResult] {
        &self.results
    }

    fn log_context(&self) -> LogContext<'_> {
        LogContext::new()
            .with_installation(&self.installation_id)
            .with_event(&self.event_id)
            .with_run(&self.run_id)
            .with_phase(self.phase.as_str())
    }

    fn advance(&mut self, next: DrPhase) {
        let previous = self.phase;
        self.phase = next;
        self.history.push(next);
        dr_info!(
            context = self.log_context(),
            "phase {} -> {} after {}ms",
            previous,
            next,
            self.started.elapsed().as_millis()
        );
    }
}

/// Owned inputs of one switch-off, so device futures borrow nothing from the run.
struct DeviceJob {
    installation_id: String,
    event_id: String,
    run_id: String,
    device_id: String,
    client: SharedDeviceClient,
    restore_delay: Duration,
}

/// The DR event state machine.
///
/// Collaborators are injected once; a single orchestrator serves any number
/// of concurrent runs.
#[derive(Clone)]
pub struct DrOrchestrator {
    settings: OrchestratorSettings,
    notifier: Arc<dyn Notifier>,
    opt_out: Arc<dyn OptOutSource>,
    status: Arc<dyn StatusIndicator>,
    restores: Arc<dyn RestoreScheduler>,
    metrics: Option<DrMetrics>,
}

impl DrOrchestrator {
    /// Orchestrator that logs notifications, never sees an opt-out, and
    /// drives the status indicator through the device API.
    pub fn new(settings: OrchestratorSettings, restores: Arc<dyn RestoreScheduler>) -> Self {
        Self {
            settings,
            notifier: Arc::new(LogNotifier),
            opt_out: Arc::new(NeverOptedOut),
            status: Arc::new(DeviceStatusIndicator::default()),
            restores,
            metrics: None,
        }
    }

    /// Replace the notifier.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the opt-out source.
    pub fn with_opt_out(mut self, opt_out: Arc<dyn OptOutSource>) -> Self {
        self.opt_out = opt_out;
        self
    }

    /// Replace the status indicator.
    pub fn with_status_indicator(mut self, status: Arc<dyn StatusIndicator>) -> Self {
        self.status = status;
        self
    }

    /// Record run, command, and status counters.
    pub fn with_metrics(mut self, metrics: DrMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Active settings.
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run `signal` against `ctx` to completion.
    ///
    /// Returns after the opt-out window and the execute phase; restores are
    /// left to the scheduler. Only precondition violations are errors.
    pub async fn process(&self, signal: &DrSignal, ctx: &DrContext) -> Result<DrOutcome, DrError> {
        self.process_with_cancellation(signal, ctx, RunCancellation::never())
            .await
    }

    /// Like [`DrOrchestrator::process`], ending early with
    /// `Aborted("Cancelled")` if `cancellation` fires during the opt-out window.
    pub async fn process_with_cancellation(
        &self,
        signal: &DrSignal,
        ctx: &DrContext,
        mut cancellation: RunCancellation,
    ) -> Result<DrOutcome, DrError> {
        let validated = signal
            .validate()
            .and_then(|()| ctx.validate())
            .and_then(|()| signal.restore_delay(self.settings.default_restore_delay));
        let restore_delay = match validated {
            Ok(delay) => delay,
            Err(err) => {
                log_system_event(None, "dr.run.rejected", &err.to_string(), SystemEventOutcome::Fault);
                self.count_event("invalid");
                return Err(err);
            }
        };

        let mut run = DrRun::new(signal, ctx);
        dr_info!(
            context = run.log_context(),
            "DR signal received: level={:?} duration={:?} devices={}",
            signal.level,
            signal.duration,
            ctx.managed_devices.len()
        );

        let notification = Notification {
            event_id: signal.event_id.clone(),
            level: signal.level,
            opt_out_window: self.settings.opt_out_window,
        };
        self.dispatch_notification(&run, notification);
        run.advance(DrPhase::Notified);

        self.update_status(&run, ctx, StatusLabel::Pending).await;
        run.advance(DrPhase::PendingOptOut);

        let cancelled = tokio::select! {
            _ = sleep(self.settings.opt_out_window) => false,
            _ = cancellation.cancelled() => true,
        };
        if cancelled {
            return Ok(self.abort(&mut run, AbortReason::Cancelled));
        }
        if self.opt_out.is_opted_out(ctx).await {
            return Ok(self.abort(&mut run, AbortReason::OptedOut));
        }

        run.advance(DrPhase::Executing);
        let results = self
            .execute_devices(&run, ctx, restore_delay)
            .await;
        run.results = results;

        self.update_status(&run, ctx, StatusLabel::Active).await;
        run.advance(DrPhase::Active);

        let failed = run.results.iter().filter(|r| !r.is_success()).count();
        let outcome = if failed == 0 {
            SystemEventOutcome::Success
        } else {
            SystemEventOutcome::Degraded
        };
        log_system_event(
            Some(&run.log_context()),
            "dr.run.completed",
            &format!(
                "{} of {} devices switched off",
                run.results.len() - failed,
                run.results.len()
            ),
            outcome,
        );
        self.count_event("completed");

        Ok(DrOutcome::Completed(CompletedRun {
            message: COMPLETED_MESSAGE.to_owned(),
            results: run.results,
        }))
    }

    /// Hand the announcement to the notifier on its own task; the run never
    /// waits on delivery.
    fn dispatch_notification(&self, run: &DrRun, notification: Notification) {
        let notifier = self.notifier.clone();
        let installation_id = run.installation_id.clone();
        let run_id = run.run_id.clone();
        tokio::spawn(async move {
            if let NotificationOutcome::Failed(reason) = notifier.notify(&notification).await {
                let context = LogContext::new()
                    .with_installation(&installation_id)
                    .with_event(&notification.event_id)
                    .with_run(&run_id);
                dr_warn!(context = context, "notification not delivered: {}", reason);
            }
        });
    }

    fn abort(&self, run: &mut DrRun, reason: AbortReason) -> DrOutcome {
        run.advance(DrPhase::Aborted);
        log_system_event(
            Some(&run.log_context()),
            "dr.run.aborted",
            reason.message(),
            SystemEventOutcome::Degraded,
        );
        let outcome = DrOutcome::Aborted(reason);
        self.count_event(outcome.label());
        outcome
    }

    async fn update_status(&self, run: &DrRun, ctx: &DrContext, label: StatusLabel) {
        let update = self
            .status
            .set_status(ctx.client.as_ref(), ctx.status_device_id.as_deref(), label)
            .await;
        if let StatusUpdate::Failed(reason) = &update {
            dr_warn!(context = run.log_context(), "status {} not applied: {}", label, reason);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_status_update(label.as_str(), update.as_str());
        }
    }

    async fn execute_devices(
        &self,
        run: &DrRun,
        ctx: &DrContext,
        restore_delay: Duration,
    ) -> Vec<DeviceCommandResult> {
        let jobs: Vec<_> = ctx
            .managed_devices
            .iter()
            .map(|device| {
                let orchestrator = self.clone();
                let job = DeviceJob {
                    installation_id: ctx.installation_id.clone(),
                    event_id: run.event_id.clone(),
                    run_id: run.run_id.clone(),
                    device_id: device.device_id.clone(),
                    client: SharedDeviceClient::clone(&ctx.client),
                    restore_delay,
                };
                async move { orchestrator.execute_device(job).await }
            })
            .collect();
        // `buffered` yields in input order, so results follow the registry.
        stream::iter(jobs)
            .buffered(self.settings.execute_concurrency.max(1))
            .collect::<Vec<_>>()
            .await
    }

    async fn execute_device(&self, job: DeviceJob) -> DeviceCommandResult {
        let log_ctx = LogContext::new()
            .with_installation(&job.installation_id)
            .with_event(&job.event_id)
            .with_run(&job.run_id)
            .with_device(&job.device_id)
            .with_phase(DrPhase::Executing.as_str());
        let result = set_switch(job.client.as_ref(), &job.device_id, SwitchState::Off).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_device_command(SwitchState::Off.command(), result.is_ok());
        }
        match result {
            Ok(()) => {
                dr_info!(context = log_ctx, "device switched off");
                let result = DeviceCommandResult::success(&job.device_id);
                self.restores.schedule(
                    RestoreTask {
                        installation_id: job.installation_id,
                        device_id: job.device_id,
                        event_id: Some(job.event_id),
                        run_id: Some(job.run_id),
                        client: job.client,
                    },
                    job.restore_delay,
                );
                result
            }
            Err(err) => {
                dr_warn!(context = log_ctx, "failed to switch device off: {}", err);
                DeviceCommandResult::failed(&job.device_id, err.message)
            }
        }
    }

    fn count_event(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_event(outcome);
        }
    }
}

impl std::fmt::Debug for DrOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrOrchestrator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancellation_pair;
    use crate::opt_out::StoredOptOut;
    use crate::outcome::CommandStatus;
    use crate::restore::TimerRestoreScheduler;
    use dr_devices::{ManagedDevice, MockDeviceClient};
    use dr_metrics::new_registry;
    use dr_store::{InstallationState, MemoryInstallationStore};
    use serde_json::json;

    const WINDOW: Duration = Duration::from_secs(30);

    struct Harness {
        client: Arc<MockDeviceClient>,
        restores: TimerRestoreScheduler,
        orchestrator: DrOrchestrator,
    }

    fn harness(settings: OrchestratorSettings) -> Harness {
        let client = Arc::new(MockDeviceClient::new());
        let restores = TimerRestoreScheduler::new();
        let orchestrator = DrOrchestrator::new(settings, Arc::new(restores.clone()));
        Harness {
            client,
            restores,
            orchestrator,
        }
    }

    fn context(client: &Arc<MockDeviceClient>, ids: &[&str]) -> DrContext {
        DrContext::new(
            "default",
            client.clone(),
            ids.iter().map(|id| ManagedDevice::new(*id)).collect(),
        )
    }

    fn switch_calls(client: &MockDeviceClient, command: &str) -> Vec<String> {
        client
            .calls()
            .into_iter()
            .filter(|call| call.capability == "switch" && call.command == command)
            .map(|call| call.device_id)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn mixed_results_follow_registry_and_only_successes_are_restored() {
        let h = harness(OrchestratorSettings::default());
        h.client.fail("d2", "off", "timeout");
        let signal = DrSignal::new("e1").with_duration(5.0);
        let ctx = context(&h.client, &["d1", "d2"]);

        let outcome = h.orchestrator.process(&signal, &ctx).await.unwrap();
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({
                "message": "DR Event Processed",
                "results": [
                    {"deviceId": "d1", "status": "Success"},
                    {"deviceId": "d2", "status": "Failed", "error": "timeout"}
                ]
            })
        );
        assert_eq!(h.restores.outstanding(), 1);
        assert!(switch_calls(&h.client, "on").is_empty());

        h.restores.wait_idle().await;
        assert_eq!(switch_calls(&h.client, "on"), vec!["d1"]);

        let off_at = h.client.calls_for("d1", "off")[0].at;
        let on_at = h.client.calls_for("d1", "on")[0].at;
        assert!(on_at - off_at >= Duration::from_secs(5));
        assert!(on_at - off_at < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn stored_opt_out_aborts_without_device_commands() {
        let store = MemoryInstallationStore::with_state(
            "default",
            InstallationState {
                opted_out: Some(true),
                ..Default::default()
            },
        );
        let mut h = harness(OrchestratorSettings::default());
        h.orchestrator = h
            .orchestrator
            .with_opt_out(Arc::new(StoredOptOut::new(Arc::new(store))));
        let ctx = context(&h.client, &["d1", "d2", "d3"]);

        let start = Instant::now();
        let outcome = h
            .orchestrator
            .process(&DrSignal::new("e1"), &ctx)
            .await
            .unwrap();

        assert_eq!(outcome, DrOutcome::Aborted(AbortReason::OptedOut));
        assert_eq!(serde_json::to_value(&outcome).unwrap(), json!("Aborted by User"));
        assert!(start.elapsed() >= WINDOW);
        assert!(h.client.calls().is_empty());
        assert_eq!(h.restores.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_after_window_without_waiting_for_restores() {
        let h = harness(OrchestratorSettings::default());
        let ctx = context(&h.client, &["d1", "d2", "d3"]);
        let start = Instant::now();

        let outcome = h
            .orchestrator
            .process(&DrSignal::new("e1"), &ctx)
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed >= WINDOW);
        assert!(elapsed < WINDOW + Duration::from_secs(10));
        assert_eq!(outcome.results().len(), 3);
        assert!(outcome
            .results()
            .iter()
            .all(|r| r.status == CommandStatus::Success));
        assert!(switch_calls(&h.client, "on").is_empty());
        assert_eq!(h.restores.outstanding(), 3);

        let off_calls = h.client.calls_for("d1", "off");
        assert!(off_calls[0].at - start >= WINDOW);

        h.restores.wait_idle().await;
        let on_at = h.client.calls_for("d3", "on")[0].at;
        let off_at = h.client.calls_for("d3", "off")[0].at;
        assert!(on_at - off_at >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_registry_completes_with_no_calls() {
        let h = harness(OrchestratorSettings::default());
        let ctx = context(&h.client, &[]);
        let outcome = h
            .orchestrator
            .process(&DrSignal::new("e1"), &ctx)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DrOutcome::Completed(CompletedRun {
                message: COMPLETED_MESSAGE.into(),
                results: Vec::new(),
            })
        );
        assert!(h.client.calls().is_empty());
        assert_eq!(h.restores.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn synthetic_status_device_is_never_called() {
        let h = harness(OrchestratorSettings::default());
        let ctx = context(&h.client, &["d1"]).with_status_device("virtual-dr-device-id-1");
        h.orchestrator
            .process(&DrSignal::new("e1"), &ctx)
            .await
            .unwrap();
        assert!(h.client.calls().iter().all(|call| call.capability != "msg"));

        let ctx = context(&h.client, &["d1"]);
        h.orchestrator
            .process(&DrSignal::new("e2"), &ctx)
            .await
            .unwrap();
        assert!(h.client.calls().iter().all(|call| call.capability != "msg"));
    }

    #[tokio::test(start_paused = true)]
    async fn real_status_device_sees_pending_then_active() {
        let h = harness(OrchestratorSettings::default());
        h.client.fail("status-1", "set", "request failed with status code 500");
        let ctx = context(&h.client, &["d1"]).with_status_device("status-1");
        let start = Instant::now();

        let outcome = h
            .orchestrator
            .process(&DrSignal::new("e1"), &ctx)
            .await
            .unwrap();
        // Status failures never leak into the outcome.
        assert_eq!(outcome.results(), &[DeviceCommandResult::success("d1")]);

        let status_calls: Vec<_> = h
            .client
            .calls()
            .into_iter()
            .filter(|call| call.capability == "msg")
            .collect();
        assert_eq!(status_calls.len(), 2);
        assert_eq!(status_calls[0].arguments, vec![json!("Pending")]);
        assert!(status_calls[0].at - start < WINDOW);
        assert_eq!(status_calls[1].arguments, vec![json!("Active")]);
        assert!(status_calls[1].at >= h.client.calls_for("d1", "off")[0].at);
    }

    #[tokio::test(start_paused = true)]
    async fn negative_duration_restores_immediately() {
        let h = harness(OrchestratorSettings::default());
        let ctx = context(&h.client, &["d1"]);
        h.orchestrator
            .process(&DrSignal::new("e1").with_duration(-4.0), &ctx)
            .await
            .unwrap();
        h.restores.wait_idle().await;
        let off_at = h.client.calls_for("d1", "off")[0].at;
        let on_at = h.client.calls_for("d1", "on")[0].at;
        assert!(on_at - off_at < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_signal_fails_fast() {
        let h = harness(OrchestratorSettings::default());
        let ctx = context(&h.client, &["d1"]);
        let start = Instant::now();
        let err = h
            .orchestrator
            .process(&DrSignal::new(""), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, DrError::InvalidSignal(_)));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(h.client.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_window_aborts() {
        let h = harness(OrchestratorSettings::default());
        let ctx = context(&h.client, &["d1"]);
        let (handle, cancellation) = cancellation_pair();
        let start = Instant::now();

        tokio::spawn(async move {
            sleep(Duration::from_secs(10)).await;
            handle.cancel();
        });
        let outcome = h
            .orchestrator
            .process_with_cancellation(&DrSignal::new("e1"), &ctx, cancellation)
            .await
            .unwrap();

        assert_eq!(outcome, DrOutcome::Aborted(AbortReason::Cancelled));
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert!(start.elapsed() < WINDOW);
        assert!(h.client.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_concurrency_keeps_registry_order() {
        let h = harness(OrchestratorSettings {
            execute_concurrency: 3,
            ..OrchestratorSettings::default()
        });
        h.client.delay("slow", Duration::from_secs(3));
        h.client.fail("bad", "off", "request failed with status code 404");
        let ctx = context(&h.client, &["slow", "bad", "fast"]);
        let start = Instant::now();

        let outcome = h
            .orchestrator
            .process(&DrSignal::new("e1"), &ctx)
            .await
            .unwrap();

        let ids: Vec<_> = outcome
            .results()
            .iter()
            .map(|r| r.device_id.as_str())
            .collect();
        assert_eq!(ids, vec!["slow", "bad", "fast"]);
        assert_eq!(outcome.results()[1].status, CommandStatus::Failed);
        assert!(start.elapsed() < WINDOW + Duration::from_secs(4));
        assert_eq!(h.restores.outstanding(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_issue_waits_for_each_device() {
        let h = harness(OrchestratorSettings::default());
        h.client.delay("d1", Duration::from_secs(2));
        h.client.delay("d2", Duration::from_secs(2));
        let ctx = context(&h.client, &["d1", "d2"]);
        h.orchestrator
            .process(&DrSignal::new("e1"), &ctx)
            .await
            .unwrap();
        let first = h.client.calls_for("d1", "off")[0].at;
        let second = h.client.calls_for("d2", "off")[0].at;
        assert!(second - first >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_count_commands_and_outcomes() {
        let metrics = DrMetrics::new(new_registry()).unwrap();
        let mut h = harness(OrchestratorSettings::default());
        h.orchestrator = h.orchestrator.with_metrics(metrics.clone());
        h.client.fail("d2", "off", "timeout");
        let ctx = context(&h.client, &["d1", "d2"]);
        h.orchestrator
            .process(&DrSignal::new("e1"), &ctx)
            .await
            .unwrap();
        assert_eq!(metrics.device_command_count("off", true), 1);
        assert_eq!(metrics.device_command_count("off", false), 1);
    }

    #[tokio::test]
    async fn run_tracks_phase_history() {
        let client = Arc::new(MockDeviceClient::new());
        let ctx = context(&client, &[]);
        let mut run = DrRun::new(&DrSignal::new("e1"), &ctx);
        run.advance(DrPhase::Notified);
        run.advance(DrPhase::PendingOptOut);
        run.advance(DrPhase::Aborted);
        assert_eq!(run.phase(), DrPhase::Aborted);
        assert_eq!(
            run.history(),
            &[
                DrPhase::Received,
                DrPhase::Notified,
                DrPhase::PendingOptOut,
                DrPhase::Aborted
            ]
        );
        assert!(run.results().is_empty());
        assert!(Uuid::parse_str(run.run_id()).is_ok());
    }

    /// Notifier that records each call, then fails or never answers.
    struct StubbornNotifier {
        calls: std::sync::atomic::AtomicUsize,
        hang: bool,
    }

    impl StubbornNotifier {
        fn new(hang: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: std::sync::atomic::AtomicUsize::new(0),
                hang,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Notifier for StubbornNotifier {
        async fn notify(&self, _notification: &Notification) -> NotificationOutcome {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            NotificationOutcome::Failed("push gateway unavailable".into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_notification_does_not_stop_the_run() {
        let notifier = StubbornNotifier::new(false);
        let mut h = harness(OrchestratorSettings::default());
        h.orchestrator = h.orchestrator.with_notifier(notifier.clone());
        let ctx = context(&h.client, &["d1"]);

        let outcome = h
            .orchestrator
            .process(&DrSignal::new("e1"), &ctx)
            .await
            .unwrap();
        assert_eq!(outcome.results(), &[DeviceCommandResult::success("d1")]);
        assert_eq!(notifier.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_notifier_does_not_delay_the_window() {
        let notifier = StubbornNotifier::new(true);
        let mut h = harness(OrchestratorSettings::default());
        h.orchestrator = h.orchestrator.with_notifier(notifier.clone());
        let ctx = context(&h.client, &["d1", "d2"]);
        let start = Instant::now();

        let outcome = tokio::time::timeout(
            Duration::from_secs(3600),
            h.orchestrator.process(&DrSignal::new("e1"), &ctx),
        )
        .await
        .expect("run finished")
        .unwrap();
        assert!(start.elapsed() < WINDOW + Duration::from_secs(1));
        assert_eq!(outcome.results().len(), 2);
        assert_eq!(switch_calls(&h.client, "off"), vec!["d1", "d2"]);
        assert_eq!(notifier.calls(), 1);
    }
}
