//! Supervisor errors.
//!
//! These describe rejected operations (unknown task, wrong state). Host
//! failures never surface here: they are recorded on the task instead.

use powblocs_registry::RegistryError;
use powblocs_task::TaskStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
  #[error(transparent)]
  Registry(#[from] RegistryError),

  #[error("task '{task_id}' not found")]
  TaskNotFound { task_id: String },

  /// The operation isn't allowed in the task's current state.
  #[error("task '{task_id}' is {state}")]
  InvalidState { task_id: String, state: TaskStatus },

  #[error("task '{task_id}' has no pending permission prompt (state: {state})")]
  NoPendingPrompt { task_id: String, state: TaskStatus },
}
