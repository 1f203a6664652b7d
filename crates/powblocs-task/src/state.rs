//! Task lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::permission::PermissionPrompt;

/// Lifecycle status of a task, without the data attached to it.
///
/// This is what travels on the wire and what observers usually match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
  Running,
  WaitingForPermission,
  Stopping,
  Stopped,
  Completed,
  Error,
}

impl TaskStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Running => "running",
      Self::WaitingForPermission => "waiting_for_permission",
      Self::Stopping => "stopping",
      Self::Stopped => "stopped",
      Self::Completed => "completed",
      Self::Error => "error",
    }
  }

  /// Terminal tasks only leave their state through a replay.
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Stopped | Self::Completed | Self::Error)
  }

  /// Whether a transition from `self` to `next` is allowed by the lifecycle.
  ///
  /// Staying in the same status is not a transition and returns `false`.
  /// `waiting_for_permission` may jump straight to a terminal status because
  /// a fast host can resolve the prompt and finish before its `running`
  /// report is processed.
  pub fn can_transition_to(&self, next: TaskStatus) -> bool {
    use TaskStatus::*;

    match (self, next) {
      (Running, WaitingForPermission | Stopping | Stopped | Completed | Error) => true,
      (WaitingForPermission, Running | Stopping | Stopped | Completed | Error) => true,
      (Stopping, Stopped) => true,
      _ => false,
    }
  }
}

impl fmt::Display for TaskStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Lifecycle state of a task together with the data that only exists in it.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
  /// Executing, or about to be. The initial state of every attempt.
  Running,
  /// Suspended until a human answers `prompt`.
  WaitingForPermission { prompt: PermissionPrompt },
  /// A stop was requested and the host has not confirmed it yet.
  Stopping,
  Stopped,
  Completed { result: serde_json::Value },
  Error { error: String },
}

impl TaskState {
  pub fn completed(result: serde_json::Value) -> Self {
    Self::Completed { result }
  }

  pub fn failed(error: impl Into<String>) -> Self {
    Self::Error {
      error: error.into(),
    }
  }

  pub fn waiting(prompt: PermissionPrompt) -> Self {
    Self::WaitingForPermission { prompt }
  }

  pub fn status(&self) -> TaskStatus {
    match self {
      Self::Running => TaskStatus::Running,
      Self::WaitingForPermission { .. } => TaskStatus::WaitingForPermission,
      Self::Stopping => TaskStatus::Stopping,
      Self::Stopped => TaskStatus::Stopped,
      Self::Completed { .. } => TaskStatus::Completed,
      Self::Error { .. } => TaskStatus::Error,
    }
  }

  pub fn is_terminal(&self) -> bool {
    self.status().is_terminal()
  }

  pub fn result(&self) -> Option<&serde_json::Value> {
    match self {
      Self::Completed { result } => Some(result),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      Self::Error { error } => Some(error),
      _ => None,
    }
  }

  pub fn permission_prompt(&self) -> Option<&PermissionPrompt> {
    match self {
      Self::WaitingForPermission { prompt } => Some(prompt),
      _ => None,
    }
  }
}
