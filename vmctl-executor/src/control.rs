//! Control socket client for a single cloud-hypervisor process.
//!
//! Translates `ping` / `configure` / `boot` into calls against the
//! hypervisor's REST API (`/api/v1/...`) on the VM's private Unix socket.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hyper::Method;
use serde::Deserialize;
use vmctl_core::VmName;

use crate::config::GuestConfig;
use crate::network::{NetworkLease, SLOT_NETMASK};
use crate::unix_client::api_request;
use crate::ExecutorError;

/// Default per-call deadline for control socket requests.
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Control protocol of one hypervisor process.
///
/// # Cancel Safety
/// All methods are cancel safe; each call uses its own connection.
#[async_trait]
pub trait ControlApi: Send + Sync {
    /// Check that the hypervisor answers on its control socket.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Unreachable`] if the socket does not answer
    /// with a success status.
    async fn ping(&self) -> Result<PingInfo, ExecutorError>;

    /// Apply the full hardware and boot configuration in one request.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ConfigError`] if the hypervisor rejects it.
    async fn configure(&self, spec: &VmSpec) -> Result<(), ExecutorError>;

    /// Boot a configured VM.
    ///
    /// # Errors
    /// Returns [`ExecutorError::BootFailed`] if the hypervisor rejects the
    /// boot or `configure` has not succeeded on this client.
    async fn boot(&self) -> Result<(), ExecutorError>;
}

/// Version information returned by `vmm.ping`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PingInfo {
    #[serde(default)]
    pub build_version: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub pid: Option<i64>,
}

/// Virtio-net device descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetDeviceSpec {
    pub tap: String,
    /// Host-side address assigned to the tap device.
    pub host_ip: std::net::Ipv4Addr,
    pub netmask: std::net::Ipv4Addr,
    pub num_queues: u32,
    pub queue_size: u32,
    pub id: String,
}

/// Everything the hypervisor needs to create one VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmSpec {
    pub kernel_path: PathBuf,
    pub cmdline: String,
    pub rootfs_path: PathBuf,
    pub vcpu_count: u8,
    pub mem_size_bytes: u64,
    pub serial_mode: String,
    pub console_mode: String,
    pub net: NetDeviceSpec,
}

impl VmSpec {
    /// Combine the shared guest profile with one VM's network lease and
    /// launch profile.
    ///
    /// The launch profile is passed to the guest untouched as
    /// `entry_point=<profile>` on the kernel command line.
    #[must_use]
    pub fn new(
        guest: &GuestConfig,
        name: &VmName,
        lease: &NetworkLease,
        entry_point: Option<&str>,
    ) -> Self {
        let mut cmdline = format!("{} {}", guest.cmdline, lease.kernel_ip_param(name.as_str()));
        if let Some(entry_point) = entry_point {
            cmdline.push_str(" entry_point=");
            cmdline.push_str(entry_point);
        }

        Self {
            kernel_path: guest.kernel_path.clone(),
            cmdline,
            rootfs_path: guest.rootfs_path.clone(),
            vcpu_count: guest.vcpu_count,
            mem_size_bytes: guest.mem_size_bytes(),
            serial_mode: guest.serial_mode.clone(),
            console_mode: guest.console_mode.clone(),
            net: NetDeviceSpec {
                tap: lease.tap_device().to_owned(),
                host_ip: lease.gateway(),
                netmask: SLOT_NETMASK,
                num_queues: guest.net_queues,
                queue_size: guest.net_queue_size,
                id: guest.net_device_id.clone(),
            },
        }
    }

    /// Request body of `PUT /api/v1/vm.create`.
    #[must_use]
    pub fn to_api_body(&self) -> serde_json::Value {
        serde_json::json!({
            "payload": {
                "kernel": self.kernel_path,
                "cmdline": self.cmdline,
            },
            "disks": [{ "path": self.rootfs_path }],
            "cpus": {
                "boot_vcpus": self.vcpu_count,
                "max_vcpus": self.vcpu_count,
            },
            "memory": { "size": self.mem_size_bytes },
            "serial": { "mode": self.serial_mode },
            "console": { "mode": self.console_mode },
            "net": [{
                "tap": self.net.tap,
                "ip": self.net.host_ip.to_string(),
                "mask": self.net.netmask.to_string(),
                "num_queues": self.net.num_queues,
                "queue_size": self.net.queue_size,
                "id": self.net.id,
            }],
        })
    }
}

/// [`ControlApi`] over a cloud-hypervisor `--api-socket`.
#[derive(Debug)]
pub struct ControlSocketClient {
    name: VmName,
    socket_path: PathBuf,
    timeout: Duration,
    configured: AtomicBool,
}

impl ControlSocketClient {
    /// Create a client for the socket at `socket_path`.
    ///
    /// No connection is made until the first call.
    #[must_use]
    pub fn new(name: VmName, socket_path: PathBuf, timeout: Duration) -> Self {
        Self { name, socket_path, timeout, configured: AtomicBool::new(false) }
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

#[async_trait]
impl ControlApi for ControlSocketClient {
    async fn ping(&self) -> Result<PingInfo, ExecutorError> {
        let body = api_request(&self.socket_path, Method::GET, "/api/v1/vmm.ping", None, self.timeout)
            .await
            .map_err(|e| ExecutorError::Unreachable { name: self.name.clone(), reason: e.to_string() })?;
        Ok(serde_json::from_str(&body).unwrap_or_default())
    }

    async fn configure(&self, spec: &VmSpec) -> Result<(), ExecutorError> {
        tracing::debug!(vm = %self.name, tap = %spec.net.tap, "configuring VM");
        api_request(
            &self.socket_path,
            Method::PUT,
            "/api/v1/vm.create",
            Some(spec.to_api_body().to_string()),
            self.timeout,
        )
        .await
        .map_err(|e| ExecutorError::ConfigError(e.to_string()))?;
        self.configured.store(true, Ordering::Release);
        Ok(())
    }

    async fn boot(&self) -> Result<(), ExecutorError> {
        if !self.configured.load(Ordering::Acquire) {
            return Err(ExecutorError::BootFailed {
                name: self.name.clone(),
                reason: "boot requested before a successful configure".to_owned(),
            });
        }
        api_request(&self.socket_path, Method::PUT, "/api/v1/vm.boot", None, self.timeout)
            .await
            .map_err(|e| ExecutorError::BootFailed { name: self.name.clone(), reason: e.to_string() })?;
        Ok(())
    }
}
