//! HTTP management API for the vmctl microVM control plane.
//!
//! Exposes start, stop, destroy and list over JSON, maps orchestrator
//! errors to HTTP statuses, and ships the client used by the `vmctl` CLI.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod client;
pub mod config;
pub mod error;
pub mod monitor;
pub mod routes;
