//! Server configuration: command-line flags with `VMCTL_*` environment
//! fallbacks.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use vmctl_executor::{
    CloudHypervisorBackend, GuestConfig, NetworkConfig, OrchestratorConfig, ProcessSupervisor,
    DEFAULT_STATE_ROOT,
};

/// vmctl management API server.
#[derive(Debug, Clone, Parser)]
#[command(name = "vmctl-gateway", version, about)]
pub struct GatewayArgs {
    /// Address the HTTP API listens on.
    #[arg(long, env = "VMCTL_LISTEN_ADDR", default_value = "127.0.0.1:3456")]
    pub listen_addr: SocketAddr,

    /// Directory holding per-VM state directories and control sockets.
    #[arg(long, env = "VMCTL_STATE_ROOT", default_value = DEFAULT_STATE_ROOT)]
    pub state_root: PathBuf,

    /// Path to the cloud-hypervisor binary, or a name looked up in PATH.
    #[arg(long, env = "VMCTL_HYPERVISOR", default_value = "cloud-hypervisor")]
    pub hypervisor: PathBuf,

    /// Guest kernel image.
    #[arg(long, env = "VMCTL_KERNEL", default_value = "/var/lib/vmctl/vmlinux")]
    pub kernel: PathBuf,

    /// Guest root filesystem image.
    #[arg(long, env = "VMCTL_ROOTFS", default_value = "/var/lib/vmctl/rootfs.ext4")]
    pub rootfs: PathBuf,

    /// Guest memory in MiB.
    #[arg(long, env = "VMCTL_MEMORY_MIB", default_value_t = 512)]
    pub memory_mib: u32,

    /// Guest vCPU count.
    #[arg(long, env = "VMCTL_VCPUS", default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..))]
    pub vcpus: u8,

    /// How long to wait for a new hypervisor's control socket, in ms.
    #[arg(long, env = "VMCTL_READINESS_TIMEOUT_MS", default_value_t = 10_000)]
    pub readiness_timeout_ms: u64,

    /// Time a hypervisor gets to exit after SIGTERM before SIGKILL, in ms.
    #[arg(long, env = "VMCTL_STOP_GRACE_MS", default_value_t = 5_000)]
    pub stop_grace_ms: u64,

    /// Deadline of each control socket call, in ms.
    #[arg(long, env = "VMCTL_API_TIMEOUT_MS", default_value_t = 30_000)]
    pub api_timeout_ms: u64,

    /// Deadline of a start request, in ms.
    #[arg(long, env = "VMCTL_REQUEST_TIMEOUT_MS", default_value_t = 60_000)]
    pub request_timeout_ms: u64,

    /// First address of the guest network pool; must be /30 aligned.
    #[arg(long, env = "VMCTL_NETWORK_BASE", default_value = "172.20.0.0")]
    pub network_base: Ipv4Addr,

    /// Number of /30 slots (and tap devices) in the pool.
    #[arg(long, env = "VMCTL_NETWORK_CAPACITY", default_value_t = 256)]
    pub network_capacity: u16,

    /// Interval of the background health check, in ms. `0` disables it.
    #[arg(long, env = "VMCTL_HEALTH_INTERVAL_MS", default_value_t = 5_000)]
    pub health_interval_ms: u64,
}

impl GatewayArgs {
    /// Orchestrator settings derived from the flags.
    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let mut guest = GuestConfig::new(self.kernel.clone(), self.rootfs.clone());
        guest.mem_size_mib = self.memory_mib;
        guest.vcpu_count = self.vcpus;

        let mut network = NetworkConfig::default();
        network.base = self.network_base;
        network.capacity = self.network_capacity;

        let mut config = OrchestratorConfig::new(self.state_root.clone(), guest);
        config.readiness_timeout = Duration::from_millis(self.readiness_timeout_ms);
        config.network = network;
        config
    }

    /// cloud-hypervisor backend configured from the flags.
    #[must_use]
    pub fn backend(&self) -> CloudHypervisorBackend {
        CloudHypervisorBackend::new(
            self.hypervisor.clone(),
            ProcessSupervisor::new(Duration::from_millis(self.stop_grace_ms)),
            Duration::from_millis(self.api_timeout_ms),
        )
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// `None` when the health monitor is disabled.
    #[must_use]
    pub fn health_interval(&self) -> Option<Duration> {
        (self.health_interval_ms > 0).then(|| Duration::from_millis(self.health_interval_ms))
    }
}
