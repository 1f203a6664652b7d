//! Sandbox host errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors a sandbox host can return when refusing a request.
#[derive(Debug, Error)]
pub enum HostError {
  /// The script could not be written to disk.
  #[error("failed to write script {path}")]
  ScriptWrite {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The interpreter process could not be started.
  #[error("failed to spawn '{program}' for task '{task_id}'")]
  Spawn {
    task_id: String,
    program: String,
    #[source]
    source: std::io::Error,
  },

  /// The task already has a live execution for this attempt.
  #[error("task '{task_id}' is already running")]
  AlreadyRunning { task_id: String },

  /// The task has no live execution.
  #[error("task '{task_id}' is not running")]
  NotRunning { task_id: String },

  /// A decision arrived for a task that is not suspended on a prompt.
  #[error("task '{task_id}' is not waiting for a permission decision")]
  NoPendingPermission { task_id: String },

  /// The script's input stream is gone (the process is exiting).
  #[error("input of task '{task_id}' is closed")]
  InputClosed { task_id: String },

  /// Any other host-specific failure.
  #[error("sandbox host error: {message}")]
  Other { message: String },
}

impl HostError {
  pub fn other(message: impl Into<String>) -> Self {
    Self::Other {
      message: message.into(),
    }
  }
}
