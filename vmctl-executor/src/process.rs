//! Hypervisor subprocess supervision.
//!
//! Spawns the hypervisor bound to a control socket path, forwards its
//! stdout/stderr into `tracing`, and terminates it with a SIGTERM followed
//! by a SIGKILL once the grace period runs out.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use crate::ExecutorError;

/// Default time a process gets to exit after SIGTERM.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// How long to wait for the exit status after SIGKILL.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// A running hypervisor process.
///
/// Dropping the handle kills the process (`kill_on_drop`), so a handle lost
/// on an unexpected exit path never leaks a hypervisor.
#[derive(Debug)]
pub struct HypervisorProcess {
    /// Label used in log events, usually the VM name.
    label: String,
    pid: Option<u32>,
    child: Child,
    started_at: DateTime<Utc>,
}

impl HypervisorProcess {
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns `true` while the process has not exited.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// Spawns and stops hypervisor processes.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    grace_period: Duration,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

impl ProcessSupervisor {
    #[must_use]
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Start `binary --api-socket <socket_path>`.
    ///
    /// Returns as soon as the process exists; the control socket is usually
    /// not listening yet.
    ///
    /// # Errors
    /// Returns [`ExecutorError::BinaryNotFound`] if the binary cannot be
    /// resolved, or [`ExecutorError::SpawnFailed`] if exec fails.
    pub fn spawn(
        &self,
        binary: &Path,
        socket_path: &Path,
        label: &str,
    ) -> Result<HypervisorProcess, ExecutorError> {
        which_binary(binary)?;

        let mut child = Command::new(binary)
            .arg("--api-socket")
            .arg(socket_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutorError::SpawnFailed(format!("exec {}: {e}", binary.display())))?;

        let pid = child.id();
        tracing::info!(vm = label, pid, socket = %socket_path.display(), "spawned hypervisor");

        if let Some(stdout) = child.stdout.take() {
            forward_output(stdout, label.to_owned(), "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(stderr, label.to_owned(), "stderr");
        }

        Ok(HypervisorProcess { label: label.to_owned(), pid, child, started_at: Utc::now() })
    }

    /// Stop the process: SIGTERM, wait up to the grace period, then SIGKILL.
    ///
    /// Returns immediately if the process already exited. Never blocks for
    /// longer than the grace period plus a fixed kill wait.
    ///
    /// # Errors
    /// Returns [`ExecutorError::TerminateFailed`] if the process is still
    /// running after SIGKILL.
    pub async fn terminate(&self, process: &mut HypervisorProcess) -> Result<(), ExecutorError> {
        if let Ok(Some(status)) = process.child.try_wait() {
            tracing::debug!(vm = %process.label, %status, "hypervisor already exited");
            return Ok(());
        }

        if let Some(pid) = process.pid.and_then(|p| i32::try_from(p).ok()) {
            match kill(Pid::from_raw(pid), Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => {
                    tracing::warn!(vm = %process.label, pid, error = %e, "SIGTERM failed");
                }
            }
        }

        match tokio::time::timeout(self.grace_period, process.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(vm = %process.label, %status, "hypervisor exited");
                return Ok(());
            }
            Ok(Err(e)) => {
                tracing::warn!(vm = %process.label, error = %e, "waiting for hypervisor failed");
            }
            Err(_) => {
                tracing::warn!(
                    vm = %process.label,
                    grace_ms = self.grace_period.as_millis(),
                    "hypervisor ignored SIGTERM, sending SIGKILL"
                );
            }
        }

        match tokio::time::timeout(KILL_WAIT, process.child.kill()).await {
            Ok(Ok(())) => {
                tracing::info!(vm = %process.label, "hypervisor killed");
                Ok(())
            }
            Ok(Err(e)) => Err(ExecutorError::TerminateFailed { pid: process.pid, reason: e.to_string() }),
            Err(_) => Err(ExecutorError::TerminateFailed {
                pid: process.pid,
                reason: format!("still running {}ms after SIGKILL", KILL_WAIT.as_millis()),
            }),
        }
    }
}

/// Forward each line of a child stream into the log.
fn forward_output<R>(stream: R, label: String, stream_name: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => tracing::info!(target: "hypervisor", vm = %label, stream = stream_name, "{line}"),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(vm = %label, stream = stream_name, error = %e, "output stream closed");
                    break;
                }
            }
        }
    });
}

/// Verify a binary exists either at the given path or in PATH.
pub(crate) fn which_binary(path: &Path) -> Result<PathBuf, ExecutorError> {
    if path.components().count() > 1 || path.is_absolute() {
        if path.is_file() {
            return Ok(path.to_owned());
        }
        return Err(ExecutorError::BinaryNotFound { path: path.to_owned() });
    }

    // Bare name, check PATH
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).map(|dir| dir.join(path)).collect::<Vec<_>>())
        .unwrap_or_default()
        .into_iter()
        .find(|p| p.is_file())
        .ok_or_else(|| ExecutorError::BinaryNotFound { path: path.to_owned() })
}
