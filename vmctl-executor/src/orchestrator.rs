//! VM lifecycle state machine over a [`VmmBackend`].
//!
//! Sequences process supervision, readiness polling and the control socket
//! to realise start, stop, destroy and list. Operations on one name are
//! serialised through the entry's process lock; different names proceed
//! independently.

use std::io;
use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::MutexGuard;
use tokio_util::sync::CancellationToken;
use vmctl_core::{DestroyAllResponse, DestroyFailure, VmInfo, VmName, VmStatus};

use crate::backend::VmmBackend;
use crate::config::{OrchestratorConfig, VmPaths};
use crate::control::{ControlApi, VmSpec};
use crate::network::NetworkPool;
use crate::readiness::wait_until_ready;
use crate::registry::{VmEntry, VmRecord, VmRegistry};
use crate::ExecutorError;

/// High-level orchestrator for VM lifecycle management.
///
/// All operations are safe to call concurrently.
pub struct VmOrchestrator<B: VmmBackend> {
    backend: B,
    config: OrchestratorConfig,
    registry: VmRegistry<B::Process>,
    network: NetworkPool,
}

impl<B: VmmBackend> VmOrchestrator<B> {
    /// Create a new orchestrator backed by the given VMM.
    ///
    /// # Errors
    /// Returns [`ExecutorError::InvalidConfig`] if the network pool settings
    /// are unusable.
    pub fn new(backend: B, config: OrchestratorConfig) -> Result<Self, ExecutorError> {
        let network = NetworkPool::new(config.network.clone())?;
        Ok(Self { backend, config, registry: VmRegistry::new(), network })
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Check the backend environment (binary, KVM).
    ///
    /// # Errors
    /// Propagates [`VmmBackend::health_check`] failures.
    pub async fn health_check(&self) -> Result<(), ExecutorError> {
        self.backend.health_check().await
    }

    /// Create, boot and register a VM.
    ///
    /// On any failure the half-started hypervisor is terminated and the
    /// record, state directory and socket are removed before returning.
    ///
    /// # Errors
    /// - [`ExecutorError::AlreadyExists`] if `name` is registered
    /// - [`ExecutorError::NetworkExhausted`] if no address slot is free
    /// - spawn errors from the backend
    /// - [`ExecutorError::StartTimeout`] if the control socket never answers,
    ///   or `cancel` fires
    /// - [`ExecutorError::BootFailed`] if configure or boot is rejected
    ///
    /// # Cancel Safety
    /// Not cancel safe. Use `cancel` to abort; dropping the future still
    /// removes the record and kills the process, but skips the graceful
    /// stop.
    pub async fn start(
        &self,
        name: VmName,
        entry_point: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<VmInfo, ExecutorError> {
        if self.registry.get(&name).is_some() {
            return Err(ExecutorError::AlreadyExists(name));
        }

        let lease = self.network.allocate()?;
        let paths = VmPaths::new(&self.config.state_root, &name);
        let entry = Arc::new(VmEntry::new(VmRecord::new(name.clone(), paths.clone(), lease, entry_point)));

        // Lock before publishing so no other operation sees a half-built VM.
        let mut slot = entry
            .try_lock()
            .map_err(|_| ExecutorError::AlreadyExists(name.clone()))?;
        self.registry.insert(Arc::clone(&entry))?;
        let mut cleanup = StartCleanup::new(&self.registry, &entry, &paths);

        tracing::info!(vm = %name, state_dir = %paths.state_dir.display(), "starting VM");

        if let Err(e) = self.launch(&name, &entry, &mut slot, &paths, cancel).await {
            tracing::warn!(vm = %name, error = %e, "start failed, cleaning up");
            self.abort_start(&entry, &mut slot).await;
            remove_state(&paths).await;
            self.registry.remove(&name, &entry);
            cleanup.disarm();
            return Err(e);
        }

        entry.set_status(VmStatus::Running);
        cleanup.disarm();
        let info = entry.info();
        tracing::info!(vm = %name, ip = %info.ip, tap = %info.tap_device, "VM running");
        Ok(info)
    }

    /// Spawn the hypervisor, wait for its socket, then configure and boot.
    async fn launch(
        &self,
        name: &VmName,
        entry: &VmEntry<B::Process>,
        slot: &mut MutexGuard<'_, Option<B::Process>>,
        paths: &VmPaths,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutorError> {
        tokio::fs::create_dir_all(&paths.state_dir).await?;
        remove_if_exists(&paths.socket_path).await?;

        let process = self.backend.spawn(name, &paths.socket_path).await?;
        **slot = Some(process);
        entry.set_status(VmStatus::Booting);

        let control = self.backend.control(name, &paths.socket_path);
        let info = wait_until_ready(
            &control,
            self.config.readiness_timeout,
            self.config.readiness_interval,
            cancel,
        )
        .await?;
        tracing::debug!(vm = %name, version = ?info.version, "control socket ready");

        let spec = entry.with_record(|r| VmSpec::new(&self.config.guest, name, r.lease(), r.entry_point()));
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ExecutorError::StartTimeout(
                "cancelled during configure".to_owned(),
            )),
            result = configure_and_boot(&control, &spec, name) => result,
        }
    }

    async fn abort_start(&self, entry: &VmEntry<B::Process>, slot: &mut MutexGuard<'_, Option<B::Process>>) {
        if let Some(mut process) = slot.take() {
            if let Err(e) = self.backend.terminate(&mut process).await {
                tracing::warn!(error = %e, "failed to terminate half-started hypervisor");
            }
        }
        entry.set_status(VmStatus::Failed);
    }

    /// Terminate the hypervisor of a running VM. The name stays reserved.
    ///
    /// # Errors
    /// - [`ExecutorError::NotFound`] if `name` is not registered
    /// - [`ExecutorError::InvalidState`] unless the VM is running
    /// - [`ExecutorError::Unreachable`] if the hypervisor already exited;
    ///   the VM is marked failed
    /// - [`ExecutorError::TerminateFailed`] if the process would not die;
    ///   the VM is marked failed
    pub async fn stop(&self, name: &VmName) -> Result<(), ExecutorError> {
        let entry = self.registry.get(name).ok_or_else(|| ExecutorError::NotFound(name.clone()))?;
        let mut slot = entry.lock().await;
        if !self.is_current(name, &entry) {
            return Err(ExecutorError::NotFound(name.clone()));
        }

        let status = entry.status();
        if status != VmStatus::Running {
            return Err(ExecutorError::InvalidState { name: name.clone(), status, operation: "stop" });
        }

        let alive = slot.as_mut().is_some_and(|p| self.backend.is_alive(p));
        let Some(process) = slot.as_mut().filter(|_| alive) else {
            entry.set_status(VmStatus::Failed);
            tracing::warn!(vm = %name, "hypervisor exited unexpectedly");
            return Err(ExecutorError::Unreachable {
                name: name.clone(),
                reason: "hypervisor process exited".to_owned(),
            });
        };

        entry.set_status(VmStatus::Stopping);
        match self.backend.terminate(process).await {
            Ok(()) => {
                *slot = None;
                entry.set_status(VmStatus::Stopped);
                tracing::info!(vm = %name, "VM stopped");
                Ok(())
            }
            Err(e) => {
                entry.set_status(VmStatus::Failed);
                tracing::error!(vm = %name, error = %e, "stop failed");
                Err(e)
            }
        }
    }

    /// Tear down a VM from any state and unregister it.
    ///
    /// The teardown always completes: a dead hypervisor is not an error, and
    /// one that survives termination is abandoned after a last kill. Either
    /// way the directory, socket and registry entry are removed.
    ///
    /// # Errors
    /// - [`ExecutorError::NotFound`] if `name` is not registered
    /// - [`ExecutorError::TerminateFailed`] if the process survived a
    ///   forced kill; reported after the VM has been unregistered
    pub async fn destroy(&self, name: &VmName) -> Result<(), ExecutorError> {
        let entry = self.registry.get(name).ok_or_else(|| ExecutorError::NotFound(name.clone()))?;
        let mut slot = entry.lock().await;
        if !self.is_current(name, &entry) {
            return Err(ExecutorError::NotFound(name.clone()));
        }

        let mut outcome = Ok(());
        if let Some(process) = slot.as_mut() {
            if let Err(e) = self.backend.terminate(process).await {
                tracing::error!(vm = %name, error = %e, "hypervisor survived termination, destroying anyway");
                outcome = Err(e);
            }
        }
        // Dropping the handle sends a final SIGKILL.
        *slot = None;

        let paths = entry.with_record(|r| r.paths().clone());
        remove_state(&paths).await;

        entry.set_status(VmStatus::Destroyed);
        self.registry.remove(name, &entry);
        if outcome.is_ok() {
            tracing::info!(vm = %name, "VM destroyed");
        }
        outcome
    }

    /// Destroy every registered VM concurrently.
    ///
    /// One VM failing does not stop the others; failures are collected in
    /// the response. Names that vanish mid-way are skipped.
    pub async fn destroy_all(&self) -> DestroyAllResponse {
        let names: Vec<VmName> = self.registry.entries().into_iter().map(|(name, _)| name).collect();
        let results = join_all(names.into_iter().map(|name| async move {
            let result = self.destroy(&name).await;
            (name, result)
        }))
        .await;

        let mut response = DestroyAllResponse::default();
        for (name, result) in results {
            match result {
                Ok(()) => response.destroyed.push(name),
                Err(ExecutorError::NotFound(_)) => {}
                Err(e) => response.failed.push(DestroyFailure { name, error: e.to_string() }),
            }
        }
        tracing::info!(
            destroyed = response.destroyed.len(),
            failed = response.failed.len(),
            "destroy-all finished"
        );
        response
    }

    /// Snapshot of one VM.
    ///
    /// # Errors
    /// Returns [`ExecutorError::NotFound`] if `name` is not registered.
    pub fn list(&self, name: &VmName) -> Result<VmInfo, ExecutorError> {
        self.registry
            .get(name)
            .map(|entry| entry.info())
            .ok_or_else(|| ExecutorError::NotFound(name.clone()))
    }

    /// Snapshot of every registered VM, ordered by name.
    #[must_use]
    pub fn list_all(&self) -> Vec<VmInfo> {
        self.registry
            .entries()
            .into_iter()
            .map(|(_, entry)| entry.info())
            .filter(|info| info.status.is_live())
            .collect()
    }

    /// Probe every running VM and mark crashed or unresponsive ones failed.
    ///
    /// VMs are probed concurrently. Pings run without holding the entry
    /// lock, so a hung hypervisor never blocks stop or destroy; a VM that
    /// changed state meanwhile is left alone. VMs busy in another operation
    /// are skipped. Returns the names that were marked failed in this round.
    pub async fn check_health(&self) -> Vec<VmName> {
        let probes = self.registry.entries().into_iter().map(|(name, entry)| async move {
            let socket = {
                let Ok(mut slot) = entry.try_lock() else {
                    return None;
                };
                if entry.status() != VmStatus::Running {
                    return None;
                }
                match slot.as_mut() {
                    None => return Some(mark_failed(&name, &entry, "no hypervisor process")),
                    Some(process) => {
                        if !self.backend.is_alive(process) {
                            return Some(mark_failed(&name, &entry, "hypervisor process exited"));
                        }
                    }
                }
                entry.with_record(|r| r.paths().socket_path.clone())
            };

            let control = self.backend.control(&name, &socket);
            let reason = match tokio::time::timeout(self.config.readiness_timeout, control.ping()).await {
                Ok(Ok(_)) => return None,
                Ok(Err(e)) => e.to_string(),
                Err(_) => "ping timed out".to_owned(),
            };

            let Ok(_slot) = entry.try_lock() else {
                return None;
            };
            if entry.status() != VmStatus::Running || !self.is_current(&name, &entry) {
                return None;
            }
            Some(mark_failed(&name, &entry, &reason))
        });
        join_all(probes).await.into_iter().flatten().collect()
    }

    /// Number of registered VMs in any state.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// Number of leased network slots.
    #[must_use]
    pub fn leased_addresses(&self) -> usize {
        self.network.leased()
    }

    fn is_current(&self, name: &VmName, entry: &Arc<VmEntry<B::Process>>) -> bool {
        self.registry.get(name).is_some_and(|current| Arc::ptr_eq(&current, entry))
    }
}

/// Caller holds the process lock of `entry`.
fn mark_failed<P>(name: &VmName, entry: &Arc<VmEntry<P>>, reason: &str) -> VmName {
    entry.set_status(VmStatus::Failed);
    tracing::warn!(vm = %name, %reason, "VM marked failed");
    name.clone()
}

async fn configure_and_boot<C: ControlApi + ?Sized>(
    control: &C,
    spec: &VmSpec,
    name: &VmName,
) -> Result<(), ExecutorError> {
    control.configure(spec).await.map_err(|e| ExecutorError::BootFailed {
        name: name.clone(),
        reason: format!("configure: {e}"),
    })?;
    control.boot().await.map_err(|e| match e {
        ExecutorError::BootFailed { .. } => e,
        other => ExecutorError::BootFailed { name: name.clone(), reason: other.to_string() },
    })
}

async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Remove the socket and state directory of a VM, logging failures.
async fn remove_state(paths: &VmPaths) {
    if let Err(e) = remove_if_exists(&paths.socket_path).await {
        tracing::warn!(socket = %paths.socket_path.display(), error = %e, "failed to remove control socket");
    }
    match tokio::fs::remove_dir_all(&paths.state_dir).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            tracing::warn!(state_dir = %paths.state_dir.display(), error = %e, "failed to remove state directory");
        }
        _ => {}
    }
}

/// Undoes a start whose future was dropped: unregisters the entry and
/// removes its state directory in the background.
struct StartCleanup<'a, P> {
    registry: &'a VmRegistry<P>,
    entry: &'a Arc<VmEntry<P>>,
    paths: &'a VmPaths,
    armed: bool,
}

impl<'a, P> StartCleanup<'a, P> {
    fn new(registry: &'a VmRegistry<P>, entry: &'a Arc<VmEntry<P>>, paths: &'a VmPaths) -> Self {
        Self { registry, entry, paths, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<P> Drop for StartCleanup<'_, P> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let name = self.entry.with_record(|r| r.name().clone());
        self.registry.remove(&name, self.entry);
        let paths = self.paths.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { remove_state(&paths).await });
            }
            Err(_) => {
                if let Err(e) = std::fs::remove_dir_all(&paths.state_dir) {
                    if e.kind() != io::ErrorKind::NotFound {
                        tracing::warn!(vm = %name, error = %e, "failed to remove state directory");
                    }
                }
            }
        }
    }
}
