//! microVM lifecycle orchestration for the vmctl control plane.
//!
//! Spawns one hypervisor process per VM, waits for its control socket,
//! configures and boots the guest, and tracks every VM in an in-memory
//! registry with per-name serialisation.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod backend;
pub mod cloud_hypervisor;
pub mod config;
pub mod control;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod network;
pub mod orchestrator;
pub mod process;
pub mod readiness;
pub mod registry;
mod unix_client;

pub use backend::VmmBackend;
pub use cloud_hypervisor::CloudHypervisorBackend;
pub use config::{GuestConfig, NetworkConfig, OrchestratorConfig, VmPaths, DEFAULT_STATE_ROOT};
pub use control::{ControlApi, ControlSocketClient, PingInfo, VmSpec, DEFAULT_API_TIMEOUT};
pub use error::ExecutorError;
pub use network::{NetworkLease, NetworkPool};
pub use orchestrator::VmOrchestrator;
pub use process::{HypervisorProcess, ProcessSupervisor, DEFAULT_GRACE_PERIOD};
pub use readiness::wait_until_ready;
pub use registry::{VmEntry, VmRecord, VmRegistry};
