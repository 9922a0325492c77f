//! Guest, network, and orchestrator configuration.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vmctl_core::VmName;

/// Default root under which per-VM state directories are created.
pub const DEFAULT_STATE_ROOT: &str = "/run/vmctl";

/// Guest hardware and boot parameters shared by every VM.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct GuestConfig {
    /// Path to the uncompressed guest kernel.
    pub kernel_path: PathBuf,

    /// Path to the root filesystem image (ext4).
    pub rootfs_path: PathBuf,

    /// Base kernel command line. Network and launch-profile parameters
    /// are appended per VM.
    pub cmdline: String,

    /// Number of virtual CPUs to boot with.
    pub vcpu_count: u8,

    /// Memory size in mebibytes.
    pub mem_size_mib: u32,

    /// Serial port mode (`Tty`, `Off`, ...). Case sensitive.
    pub serial_mode: String,

    /// Console mode (`Tty`, `Off`, ...). Case sensitive.
    pub console_mode: String,

    /// Number of virtio-net queues.
    pub net_queues: u32,

    /// Size of each virtio-net queue.
    pub net_queue_size: u32,

    /// Identifier of the guest network device.
    pub net_device_id: String,
}

impl GuestConfig {
    /// Create a guest config with the default hardware profile.
    ///
    /// # Arguments
    /// - `kernel_path`: path to the kernel image
    /// - `rootfs_path`: path to the root filesystem
    #[must_use]
    pub fn new(kernel_path: PathBuf, rootfs_path: PathBuf) -> Self {
        Self {
            kernel_path,
            rootfs_path,
            cmdline: "console=ttyS0 root=/dev/vda rw init=/bin/bash".to_owned(),
            vcpu_count: 1,
            mem_size_mib: 512,
            serial_mode: "Tty".to_owned(),
            console_mode: "Off".to_owned(),
            net_queues: 2,
            net_queue_size: 256,
            net_device_id: "_net0".to_owned(),
        }
    }

    /// Memory size in bytes, as the hypervisor API expects it.
    #[must_use]
    pub fn mem_size_bytes(&self) -> u64 {
        u64::from(self.mem_size_mib) * 1024 * 1024
    }
}

/// Address pool from which every VM gets its own tap device and /30 subnet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct NetworkConfig {
    /// First address of the pool; must be 4-aligned.
    pub base: Ipv4Addr,

    /// Number of /30 slots, i.e. the maximum number of concurrent VMs.
    pub capacity: u16,

    /// Prefix of generated tap device names (`<prefix><slot>`).
    pub tap_prefix: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base: Ipv4Addr::new(172, 20, 0, 0),
            capacity: 256,
            tap_prefix: "vmtap".to_owned(),
        }
    }
}

/// Settings of the lifecycle orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct OrchestratorConfig {
    /// Directory holding one state directory per VM.
    pub state_root: PathBuf,

    /// How long to wait for the control socket to answer a ping.
    pub readiness_timeout: Duration,

    /// Pause between readiness pings.
    pub readiness_interval: Duration,

    pub guest: GuestConfig,

    pub network: NetworkConfig,
}

impl OrchestratorConfig {
    /// Create an orchestrator config with default timings and network pool.
    #[must_use]
    pub fn new(state_root: PathBuf, guest: GuestConfig) -> Self {
        Self {
            state_root,
            readiness_timeout: Duration::from_secs(10),
            readiness_interval: Duration::from_millis(10),
            guest,
            network: NetworkConfig::default(),
        }
    }
}

/// Filesystem locations owned by one VM. Derived solely from its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmPaths {
    pub state_dir: PathBuf,
    pub socket_path: PathBuf,
}

impl VmPaths {
    #[must_use]
    pub fn new(state_root: &Path, name: &VmName) -> Self {
        let state_dir = state_root.join(name.as_str());
        let socket_path = state_dir.join(format!("{name}.sock"));
        Self { state_dir, socket_path }
    }
}
