//! ---
//! ems_section: "04-configuration-orchestration"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "DR event state machine coordinating devices and deferred restores."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

/// Message announced to the user when a DR event starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Event being announced.
    pub event_id: String,
    /// Severity carried by the signal.
    pub level: Option<f64>,
    /// How long the user has to opt out.
    pub opt_out_window: Duration,
}

impl Notification {
    /// Human readable text.
    pub fn text(&self) -> String {
        format!(
            "DR Event Imminent! Opt-out in {}s.",
            self.opt_out_window.as_secs()
        )
    }
}

/// Delivery result; the orchestrator logs it and moves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// Handed to the delivery channel.
    Delivered,
    /// Delivery failed; the run continues regardless.
    Failed(String),
}

/// Best-effort user notification.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Announce the event.
    async fn notify(&self, notification: &Notification) -> NotificationOutcome;
}

/// Notifier that writes the announcement to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> NotificationOutcome {
        info!(
            dr_event = %notification.event_id,
            level = ?notification.level,
            "push notification: {}",
            notification.text()
        );
        NotificationOutcome::Delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_notifier_always_delivers() {
        let notification = Notification {
            event_id: "e1".into(),
            level: Some(1.0),
            opt_out_window: Duration::from_secs(30),
        };
        assert_eq!(notification.text(), "DR Event Imminent! Opt-out in 30s.");
        assert_eq!(
            LogNotifier.notify(&notification).await,
            NotificationOutcome::Delivered
        );
    }
}
