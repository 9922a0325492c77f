//! Readiness polling for a freshly spawned hypervisor.
//!
//! The hypervisor creates its control socket some time after the process
//! starts. Until a ping succeeds, no other control call is safe.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::control::{ControlApi, PingInfo};
use crate::ExecutorError;

/// Poll `control` with pings until one succeeds.
///
/// Individual ping failures (socket missing, connection refused) are
/// expected while the hypervisor starts and are retried every `interval`.
/// Only the total elapsed time bounds the loop.
///
/// # Errors
/// Returns [`ExecutorError::StartTimeout`] if no ping succeeds within
/// `timeout`, or as soon as `cancel` fires.
///
/// # Cancel Safety
/// Cancel safe. Dropping the future stops polling; no task is left behind.
pub async fn wait_until_ready<C>(
    control: &C,
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<PingInfo, ExecutorError>
where
    C: ControlApi + ?Sized,
{
    let started = Instant::now();
    let deadline = started + timeout;

    let poll = async {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match control.ping().await {
                Ok(info) => return (info, attempts),
                Err(e) => tracing::trace!(attempt = attempts, error = %e, "control socket not ready"),
            }
            tokio::time::sleep(interval).await;
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ExecutorError::StartTimeout(format!(
            "cancelled after {}ms",
            started.elapsed().as_millis()
        ))),
        () = tokio::time::sleep_until(deadline) => Err(ExecutorError::StartTimeout(format!(
            "no successful ping within {}ms",
            timeout.as_millis()
        ))),
        (info, attempts) = poll => {
            tracing::info!(
                build_version = info.build_version.as_deref().unwrap_or("unknown"),
                attempts,
                elapsed_ms = started.elapsed().as_millis(),
                "hypervisor control socket up"
            );
            Ok(info)
        }
    }
}
