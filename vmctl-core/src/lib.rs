//! Core types for the vmctl microVM control plane.
//!
//! Defines VM names, the lifecycle state machine, and the request/response
//! bodies shared by the management API server and its clients.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod api;
pub mod error;
pub mod name;
pub mod status;

pub use api::{DestroyAllResponse, DestroyFailure, ErrorBody, StartVmRequest, VmInfo};
pub use error::CoreError;
pub use name::{VmName, MAX_NAME_LEN};
pub use status::VmStatus;
