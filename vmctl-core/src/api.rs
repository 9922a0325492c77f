//! Request and response bodies of the management API.
//!
//! Shared by the gateway (server side) and the `vmctl` CLI (client side).

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::name::VmName;
use crate::status::VmStatus;

/// Externally visible projection of a VM record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct VmInfo {
    pub name: VmName,
    pub status: VmStatus,
    /// Guest IP address.
    pub ip: Ipv4Addr,
    /// Host-side tap device bound to the guest NIC.
    pub tap_device: String,
    /// Launch profile supplied at start, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl VmInfo {
    #[must_use]
    pub fn new(
        name: VmName,
        status: VmStatus,
        ip: Ipv4Addr,
        tap_device: String,
        entry_point: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self { name, status, ip, tap_device, entry_point, created_at }
    }
}

/// `POST /v1/vms` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartVmRequest {
    pub name: VmName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
}

/// One VM that could not be torn down by `DELETE /v1/vms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyFailure {
    pub name: VmName,
    pub error: String,
}

/// `DELETE /v1/vms` response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyAllResponse {
    pub destroyed: Vec<VmName>,
    pub failed: Vec<DestroyFailure>,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}
