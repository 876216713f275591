//! ---
//! ems_section: "04-configuration-orchestration"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "DR event state machine coordinating devices and deferred restores."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use tokio::sync::watch;

/// Create a linked cancel handle and run-side receiver.
pub fn cancellation_pair() -> (CancelHandle, RunCancellation) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, RunCancellation { rx })
}

/// Caller side: requests cancellation of a run waiting in its opt-out window.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Request cancellation. Has no effect once the run left the window.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Run side: observed by the orchestrator at the opt-out wait.
#[derive(Debug, Clone)]
pub struct RunCancellation {
    rx: watch::Receiver<bool>,
}

impl RunCancellation {
    /// A cancellation that never fires.
    pub fn never() -> Self {
        cancellation_pair().1
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested; pends forever if the handle is dropped first.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn cancel_wakes_waiter() {
        let (handle, mut cancellation) = cancellation_pair();
        assert!(!cancellation.is_cancelled());
        let waiter = tokio::spawn(async move {
            cancellation.cancelled().await;
        });
        handle.cancel();
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter wakes")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn never_does_not_fire() {
        let mut cancellation = RunCancellation::never();
        assert!(timeout(Duration::from_secs(60), cancellation.cancelled())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn cancel_before_wait_is_observed() {
        let (handle, mut cancellation) = cancellation_pair();
        handle.cancel();
        assert!(cancellation.is_cancelled());
        cancellation.cancelled().await;
    }
}
