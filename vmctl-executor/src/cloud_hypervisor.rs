//! cloud-hypervisor VMM backend implementation.
//!
//! Runs one `cloud-hypervisor --api-socket <path>` process per VM and
//! drives it through its REST API (HTTP over Unix domain socket).

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use vmctl_core::VmName;

use crate::backend::VmmBackend;
use crate::control::{ControlSocketClient, DEFAULT_API_TIMEOUT};
use crate::process::{which_binary, HypervisorProcess, ProcessSupervisor};
use crate::ExecutorError;

const KVM_DEVICE: &str = "/dev/kvm";

/// cloud-hypervisor backend.
#[derive(Debug, Clone)]
pub struct CloudHypervisorBackend {
    /// Path to the `cloud-hypervisor` binary.
    binary_path: PathBuf,

    supervisor: ProcessSupervisor,

    /// Deadline of each control socket call.
    api_timeout: Duration,
}

impl CloudHypervisorBackend {
    /// Create a new backend.
    ///
    /// # Arguments
    /// - `binary_path`: path to the `cloud-hypervisor` binary, or a bare
    ///   name looked up in `PATH`
    /// - `supervisor`: process supervisor carrying the stop grace period
    /// - `api_timeout`: deadline of every control socket request
    #[must_use]
    pub fn new(binary_path: PathBuf, supervisor: ProcessSupervisor, api_timeout: Duration) -> Self {
        Self { binary_path, supervisor, api_timeout }
    }

    /// Create a backend using system defaults.
    ///
    /// Looks for `cloud-hypervisor` in `$PATH`.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(
            PathBuf::from("cloud-hypervisor"),
            ProcessSupervisor::default(),
            DEFAULT_API_TIMEOUT,
        )
    }

    #[must_use]
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }
}

#[async_trait]
impl VmmBackend for CloudHypervisorBackend {
    type Process = HypervisorProcess;
    type Control = ControlSocketClient;

    async fn spawn(&self, name: &VmName, socket_path: &Path) -> Result<HypervisorProcess, ExecutorError> {
        self.supervisor.spawn(&self.binary_path, socket_path, name.as_str())
    }

    async fn terminate(&self, process: &mut HypervisorProcess) -> Result<(), ExecutorError> {
        self.supervisor.terminate(process).await
    }

    fn is_alive(&self, process: &mut HypervisorProcess) -> bool {
        process.is_alive()
    }

    fn control(&self, name: &VmName, socket_path: &Path) -> ControlSocketClient {
        ControlSocketClient::new(name.clone(), socket_path.to_owned(), self.api_timeout)
    }

    async fn health_check(&self) -> Result<(), ExecutorError> {
        tokio::fs::metadata(KVM_DEVICE).await.map_err(|e| ExecutorError::KvmUnavailable {
            reason: format!("cannot access {KVM_DEVICE}: {e}"),
        })?;

        which_binary(&self.binary_path)?;

        Ok(())
    }
}
