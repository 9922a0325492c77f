//! Background health monitor.
//!
//! Periodically probes every running VM so a crashed hypervisor is reported
//! as `failed` without waiting for the next client request.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vmctl_executor::{VmOrchestrator, VmmBackend};

/// Run [`VmOrchestrator::check_health`] every `interval` until `shutdown`
/// fires.
pub fn spawn_health_monitor<B: VmmBackend>(
    orchestrator: Arc<VmOrchestrator<B>>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let failed = orchestrator.check_health().await;
                    if !failed.is_empty() {
                        tracing::warn!(count = failed.len(), "health check marked VMs failed");
                    }
                }
            }
        }
        tracing::debug!("health monitor stopped");
    })
}

/// Wait for a monitor started by [`spawn_health_monitor`] to finish.
///
/// Returns `false`, after logging, if the task panicked or was aborted.
pub async fn join_health_monitor(handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "health monitor task failed");
            false
        }
    }
}
