//! PowBlocs Supervisor
//!
//! Drives tasks through their lifecycle on top of a [`SandboxHost`]:
//!
//! ```text
//!              run / replay
//!                   │
//!                   ▼
//!   ┌─────────── running ◀──────── Allow / AllowAll ───┐
//!   │               │                                  │
//!   │               └──── prompt ──▶ waiting_for_permission
//!   │                                  │   │
//!   │      stop ──▶ stopping ◀─────────┘   └── Deny ──▶ error
//!   │                  │
//!   │                  ▼
//!   └──▶ completed / error / stopped
//! ```
//!
//! - [`ExecutionSupervisor`] owns `run`, `replay` and `stop`, and applies
//!   host notifications to the registry and the event stream.
//! - [`PermissionMediator`] forwards human decisions for pending prompts.
//!
//! Every operation returns as soon as the host has acknowledged the request;
//! progress is observed through the [`TaskRegistry`] and [`EventStream`].
//!
//! [`SandboxHost`]: powblocs_sandbox::SandboxHost
//! [`TaskRegistry`]: powblocs_registry::TaskRegistry
//! [`EventStream`]: powblocs_events::EventStream

mod error;
mod mediator;
mod supervisor;
mod transition;

pub use error::SupervisorError;
pub use mediator::PermissionMediator;
pub use supervisor::{ExecutionSupervisor, RunRequest, SupervisorConfig};
