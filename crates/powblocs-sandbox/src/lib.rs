//! PowBlocs Sandbox
//!
//! The contract between the execution bridge and whatever actually runs
//! scripts in isolation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   start / stop / kill /     ┌──────────────────────┐
//! │ ExecutionSupervisor  │ ─── resolve_permission ───▶ │  impl SandboxHost    │
//! │ (powblocs-supervisor)│                             │  (e.g. ProcessHost)  │
//! │                      │ ◀── HostNotification ────── │                      │
//! └──────────────────────┘     via HostNotifier        └──────────────────────┘
//! ```
//!
//! Outbound calls return as soon as the host has accepted the request.
//! Progress comes back as [`HostNotification`]s pushed through the
//! [`HostNotifier`] the host was built with.
//!
//! [`ProcessHost`] is a reference host that runs every task as a child
//! process speaking line-delimited JSON (see [`protocol`]).

mod error;
mod host;
mod notify;
mod process;
pub mod protocol;

pub use error::HostError;
pub use host::{ExecutionRequest, SandboxHost};
pub use notify::{ChannelNotifier, HostNotification, HostNotifier, NoopNotifier};
pub use process::{ProcessHost, ProcessHostConfig};
