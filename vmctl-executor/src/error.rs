//! Error types for the executor crate.

use std::path::PathBuf;

use vmctl_core::{CoreError, VmName, VmStatus};

/// Errors that can occur during VM lifecycle operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExecutorError {
    /// A VM with this name is already registered.
    #[error("VM already exists: {0}")]
    AlreadyExists(VmName),

    /// No VM with this name is registered.
    #[error("VM not found: {0}")]
    NotFound(VmName),

    /// The operation is not valid from the VM's current state.
    #[error("cannot {operation} VM {name} while it is {status}")]
    InvalidState {
        name: VmName,
        status: VmStatus,
        operation: &'static str,
    },

    /// The name failed validation.
    #[error(transparent)]
    InvalidName(#[from] CoreError),

    /// Hypervisor binary not found at the configured path.
    #[error("hypervisor binary not found at {path}")]
    BinaryNotFound { path: PathBuf },

    /// KVM device is not available or not accessible.
    #[error("KVM not available: {reason}")]
    KvmUnavailable { reason: String },

    /// The hypervisor process could not be started.
    #[error("hypervisor spawn failed: {0}")]
    SpawnFailed(String),

    /// The control socket never answered a ping within the readiness window,
    /// or the start was cancelled while waiting.
    #[error("control socket not ready: {0}")]
    StartTimeout(String),

    /// The hypervisor rejected the VM configuration.
    #[error("VM configuration rejected: {0}")]
    ConfigError(String),

    /// Configuration or boot failed during start.
    #[error("boot failed for VM {name}: {reason}")]
    BootFailed { name: VmName, reason: String },

    /// The hypervisor process did not exit even after a forced kill.
    #[error("failed to terminate hypervisor (pid {pid:?}): {reason}")]
    TerminateFailed { pid: Option<u32>, reason: String },

    /// The control socket stopped answering after the VM was running.
    #[error("VM {name} unreachable: {reason}")]
    Unreachable { name: VmName, reason: String },

    /// No free tap device / address slot is left in the network pool.
    #[error("network pool exhausted ({capacity} slots in use)")]
    NetworkExhausted { capacity: u16 },

    /// A configuration value is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Control socket HTTP request failed.
    #[error("API request failed: {0}")]
    ApiError(String),

    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ExecutorError {
    /// Stable snake_case identifier of the error kind, used in API responses.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AlreadyExists(_) => "already_exists",
            Self::NotFound(_) => "not_found",
            Self::InvalidState { .. } => "invalid_state",
            Self::InvalidName(_) => "invalid_name",
            Self::BinaryNotFound { .. } | Self::KvmUnavailable { .. } | Self::SpawnFailed(_) => {
                "spawn_error"
            }
            Self::StartTimeout(_) => "start_timeout",
            Self::ConfigError(_) => "config_error",
            Self::BootFailed { .. } => "boot_failed",
            Self::TerminateFailed { .. } => "terminate_error",
            Self::Unreachable { .. } => "unreachable",
            Self::NetworkExhausted { .. } => "network_exhausted",
            Self::InvalidConfig(_) => "invalid_config",
            Self::ApiError(_) => "api_error",
            Self::Io(_) => "io_error",
        }
    }
}
