//! # Cooperative Shutdown
//!
//! A process-wide, set-once stop flag shared by every long-running task.
//!
//! ## Semantics:
//! - **Level-triggered**: once raised it stays raised, so a task that checks
//!   late still sees it
//! - **Cooperative**: nothing is aborted; each task polls or awaits the signal
//!   at its natural suspension point and exits on its own
//! - **Bounded join**: [`join_with_timeout`] waits for all tasks together and
//!   reports the ones still running when the deadline passes
//!
//! Built on `tokio::sync::watch` so that waiters are woken immediately instead
//! of sleeping in a polling loop.

use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Cloneable handle to the shared stop flag.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the flag. Returns `true` for the call that actually raised it.
    pub fn trigger(&self) -> bool {
        let was_set = self.tx.send_replace(true);
        if !was_set {
            info!("Shutdown signal raised");
        }
        !was_set
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the flag is raised (immediately if it already is).
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives inside `self`, so the channel cannot close here.
        let _ = rx.wait_for(|raised| *raised).await;
    }
}

/// Wait for every named task to finish, sharing one deadline.
///
/// Tasks still running at the deadline are logged and left detached; their
/// names are returned so the caller can report them.
pub async fn join_with_timeout(tasks: Vec<(String, JoinHandle<()>)>, timeout: Duration) -> Vec<String> {
    let deadline = Instant::now() + timeout;

    let results = join_all(tasks.into_iter().map(|(name, handle)| async move {
        let outcome = tokio::time::timeout_at(deadline, handle).await;
        (name, outcome)
    }))
    .await;

    let mut stragglers = Vec::new();
    for (name, outcome) in results {
        match outcome {
            Ok(Ok(())) => debug!(task = %name, "Task stopped"),
            Ok(Err(e)) => error!(task = %name, error = %e, "Task ended abnormally"),
            Err(_) => {
                warn!(task = %name, timeout_ms = timeout.as_millis() as u64, "Task did not stop in time");
                stragglers.push(name);
            }
        }
    }
    stragglers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_is_level_triggered() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());

        assert!(signal.trigger());
        assert!(!signal.trigger(), "second trigger is a no-op");
        assert!(signal.is_triggered());

        // A waiter that arrives after the trigger still returns.
        tokio::time::timeout(Duration::from_millis(100), signal.wait())
            .await
            .expect("wait should resolve once raised");
    }

    #[tokio::test]
    async fn test_waiters_wake_on_trigger() {
        let signal = ShutdownSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        signal.trigger();
        tokio::time::timeout(Duration::from_millis(500), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_join_reports_stragglers() {
        let signal = ShutdownSignal::new();

        let cooperative = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };
        let stubborn = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        signal.trigger();
        let stragglers = join_with_timeout(
            vec![
                ("detector-1".to_string(), cooperative),
                ("stubborn".to_string(), stubborn),
            ],
            Duration::from_millis(100),
        )
        .await;

        assert_eq!(stragglers, vec!["stubborn".to_string()]);
    }
}
