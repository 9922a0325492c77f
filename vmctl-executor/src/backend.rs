//! VMM backend abstraction trait.
//!
//! Separates the orchestration state machine from the concrete hypervisor:
//! how a process is spawned, stopped and probed, and how its control
//! socket is reached.

use std::path::Path;

use async_trait::async_trait;
use vmctl_core::VmName;

use crate::control::ControlApi;
use crate::ExecutorError;

/// Virtual Machine Manager abstraction.
///
/// Implementations must be `Send + Sync` to allow use across async tasks.
#[async_trait]
pub trait VmmBackend: Send + Sync + 'static {
    /// Live hypervisor process, exclusively owned by one VM record.
    type Process: Send + 'static;

    /// Control socket client for one VM.
    type Control: ControlApi + 'static;

    /// Start a hypervisor listening on `socket_path`.
    ///
    /// Must not wait for the socket; readiness is established separately.
    ///
    /// # Errors
    /// Returns [`ExecutorError::BinaryNotFound`] or
    /// [`ExecutorError::SpawnFailed`] if the process cannot be started.
    async fn spawn(&self, name: &VmName, socket_path: &Path) -> Result<Self::Process, ExecutorError>;

    /// Stop a process, escalating to a forced kill after a grace period.
    ///
    /// # Errors
    /// Returns [`ExecutorError::TerminateFailed`] if the process survives
    /// the forced kill.
    async fn terminate(&self, process: &mut Self::Process) -> Result<(), ExecutorError>;

    /// Returns `true` while the process is running.
    fn is_alive(&self, process: &mut Self::Process) -> bool;

    /// Build a control client for the socket at `socket_path`.
    fn control(&self, name: &VmName, socket_path: &Path) -> Self::Control;

    /// Check if the backend is available and properly configured.
    ///
    /// # Errors
    /// Returns [`ExecutorError::BinaryNotFound`] or [`ExecutorError::KvmUnavailable`]
    /// if the environment is not ready.
    async fn health_check(&self) -> Result<(), ExecutorError>;
}
