//! Scriptable in-memory [`VmmBackend`] for tests.
//!
//! No hypervisor is started. "Processes" are flags, and every control call
//! succeeds or fails according to [`MockBehavior`].

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use vmctl_core::VmName;

use crate::backend::VmmBackend;
use crate::control::{ControlApi, PingInfo, VmSpec};
use crate::ExecutorError;

/// Failure injection knobs.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    pub spawn_fails: bool,
    /// Every ping fails, so readiness never succeeds.
    pub never_ready: bool,
    /// Delay before each ping answers.
    pub ping_delay: Duration,
    /// Delay before `configure` answers.
    pub configure_delay: Duration,
    pub configure_fails: bool,
    pub boot_fails: bool,
    /// VM names whose process survives termination.
    pub terminate_fails_for: HashSet<String>,
    /// VM names whose control socket stops answering.
    pub unreachable: HashSet<String>,
}

#[derive(Debug, Default)]
struct MockState {
    behavior: MockBehavior,
    processes: HashMap<String, Arc<AtomicBool>>,
    spawned: usize,
    configured: Vec<VmSpec>,
}

/// In-memory backend; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_behavior(behavior: MockBehavior) -> Self {
        let backend = Self::new();
        backend.state().behavior = behavior;
        backend
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.state.lock().expect("mock backend lock poisoned")
    }

    /// Change the behavior for subsequent calls.
    pub fn update(&self, f: impl FnOnce(&mut MockBehavior)) {
        f(&mut self.state().behavior);
    }

    /// Number of processes spawned so far.
    #[must_use]
    pub fn spawned(&self) -> usize {
        self.state().spawned
    }

    /// Number of processes currently alive.
    #[must_use]
    pub fn live(&self) -> usize {
        self.state().processes.values().filter(|a| a.load(Ordering::SeqCst)).count()
    }

    /// Simulate the hypervisor of `name` exiting on its own.
    pub fn crash(&self, name: &str) {
        if let Some(alive) = self.state().processes.get(name) {
            alive.store(false, Ordering::SeqCst);
        }
    }

    /// Specs passed to `configure`, in call order.
    #[must_use]
    pub fn configured(&self) -> Vec<VmSpec> {
        self.state().configured.clone()
    }
}

/// Handle of a simulated hypervisor.
#[derive(Debug)]
pub struct MockProcess {
    name: String,
    alive: Arc<AtomicBool>,
}

/// Control client of a simulated hypervisor.
#[derive(Debug)]
pub struct MockControl {
    name: VmName,
    backend: MockBackend,
    configured: AtomicBool,
}

#[async_trait]
impl ControlApi for MockControl {
    async fn ping(&self) -> Result<PingInfo, ExecutorError> {
        let (delay, fails) = {
            let state = self.backend.state();
            let b = &state.behavior;
            (b.ping_delay, b.never_ready || b.unreachable.contains(self.name.as_str()))
        };
        tokio::time::sleep(delay).await;
        if fails {
            return Err(ExecutorError::Unreachable {
                name: self.name.clone(),
                reason: "connection refused".to_owned(),
            });
        }
        Ok(PingInfo { build_version: Some("mock".to_owned()), ..PingInfo::default() })
    }

    async fn configure(&self, spec: &VmSpec) -> Result<(), ExecutorError> {
        let delay = self.backend.state().behavior.configure_delay;
        tokio::time::sleep(delay).await;
        let mut state = self.backend.state();
        if state.behavior.configure_fails {
            return Err(ExecutorError::ConfigError("HTTP 400 Bad Request".to_owned()));
        }
        state.configured.push(spec.clone());
        self.configured.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn boot(&self) -> Result<(), ExecutorError> {
        if self.backend.state().behavior.boot_fails || !self.configured.load(Ordering::SeqCst) {
            return Err(ExecutorError::BootFailed {
                name: self.name.clone(),
                reason: "HTTP 500 Internal Server Error".to_owned(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VmmBackend for MockBackend {
    type Process = MockProcess;
    type Control = MockControl;

    async fn spawn(&self, name: &VmName, socket_path: &Path) -> Result<MockProcess, ExecutorError> {
        if self.state().behavior.spawn_fails {
            return Err(ExecutorError::BinaryNotFound { path: PathBuf::from("mock-hypervisor") });
        }
        // A real hypervisor creates its socket file.
        tokio::fs::write(socket_path, b"").await?;

        let alive = Arc::new(AtomicBool::new(true));
        let mut state = self.state();
        state.spawned += 1;
        state.processes.insert(name.to_string(), Arc::clone(&alive));
        Ok(MockProcess { name: name.to_string(), alive })
    }

    async fn terminate(&self, process: &mut MockProcess) -> Result<(), ExecutorError> {
        if self.state().behavior.terminate_fails_for.contains(&process.name) {
            return Err(ExecutorError::TerminateFailed {
                pid: None,
                reason: "process in uninterruptible sleep".to_owned(),
            });
        }
        process.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_alive(&self, process: &mut MockProcess) -> bool {
        process.alive.load(Ordering::SeqCst)
    }

    fn control(&self, name: &VmName, _socket_path: &Path) -> MockControl {
        MockControl { name: name.clone(), backend: self.clone(), configured: AtomicBool::new(false) }
    }

    async fn health_check(&self) -> Result<(), ExecutorError> {
        Ok(())
    }
}
