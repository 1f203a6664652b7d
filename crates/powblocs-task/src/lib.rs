//! PowBlocs Task
//!
//! Types shared by every part of the execution bridge: the [`Task`] record
//! owned by the registry, its lifecycle [`TaskState`], permission prompts and
//! decisions, streamed [`TaskEvent`]s, and the reports a sandbox host pushes
//! back while a script runs.
//!
//! `TaskState` carries the data that only exists in a given state (the result
//! of a completed task, the error of a failed one, the pending prompt of a
//! suspended one), so a task can never be both completed and failed, and a
//! prompt can never outlive the `waiting_for_permission` state.

mod error;
mod event;
mod permission;
mod report;
mod state;
mod task;

pub use error::{ParseDecisionError, ReportError};
pub use event::TaskEvent;
pub use permission::{PermissionDecision, PermissionPrompt, PermissionRecord};
pub use report::{EventReport, StateReport};
pub use state::{TaskState, TaskStatus};
pub use task::{Task, TaskView};
