//! Signal handling and bounded task draining.

use std::time::Duration;

use futures::future::join_all;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

/// Resolve on SIGINT (Ctrl-C) or, on Unix, SIGTERM.
///
/// A handler that cannot be installed never resolves, so the other one
/// still works.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C"),
        () = terminate => info!("received SIGTERM"),
    }
}

/// How a task ended during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Finished before the deadline.
    Finished,
    /// Panicked or was aborted.
    Failed,
    /// Still running at the deadline; abandoned.
    TimedOut,
}

/// Wait for every named task, sharing a single `grace` deadline.
///
/// Tasks still running at the deadline are aborted and logged. Outcomes are
/// returned in input order.
pub async fn drain(tasks: Vec<(&'static str, JoinHandle<()>)>, grace: Duration) -> Vec<TaskOutcome> {
    let deadline = Instant::now().checked_add(grace).unwrap_or_else(Instant::now);

    let waits = tasks.into_iter().map(|(name, mut handle)| async move {
        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(())) => {
                info!(task = name, "task stopped");
                TaskOutcome::Finished
            }
            Ok(Err(e)) => {
                warn!(task = name, error = %e, "task failed during shutdown");
                TaskOutcome::Failed
            }
            Err(_) => {
                warn!(
                    task = name,
                    grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                    "task did not stop within grace period, abandoning"
                );
                handle.abort();
                TaskOutcome::TimedOut
            }
        }
    });

    join_all(waits).await
}
