//! Notifications pushed by the sandbox host.

use serde::{Deserialize, Serialize};

use crate::error::ReportError;
use crate::permission::PermissionPrompt;
use crate::state::{TaskState, TaskStatus};

/// A state transition reported by the sandbox host for one attempt of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateReport {
  pub task_id: String,
  /// Attempt the report belongs to; reports for older attempts are stale.
  pub attempt: u32,
  pub state: TaskStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub return_value: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub permission_prompt: Option<PermissionPrompt>,
  /// Prompts the host has seen for this task. Informational only.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub permission_history: Vec<PermissionPrompt>,
}

impl StateReport {
  pub fn new(task_id: impl Into<String>, attempt: u32, state: TaskStatus) -> Self {
    Self {
      task_id: task_id.into(),
      attempt,
      state,
      return_value: None,
      error: None,
      permission_prompt: None,
      permission_history: Vec::new(),
    }
  }

  pub fn running(task_id: impl Into<String>, attempt: u32) -> Self {
    Self::new(task_id, attempt, TaskStatus::Running)
  }

  pub fn stopped(task_id: impl Into<String>, attempt: u32) -> Self {
    Self::new(task_id, attempt, TaskStatus::Stopped)
  }

  pub fn completed(task_id: impl Into<String>, attempt: u32, value: serde_json::Value) -> Self {
    Self {
      return_value: Some(value),
      ..Self::new(task_id, attempt, TaskStatus::Completed)
    }
  }

  pub fn failed(task_id: impl Into<String>, attempt: u32, error: impl Into<String>) -> Self {
    Self {
      error: Some(error.into()),
      ..Self::new(task_id, attempt, TaskStatus::Error)
    }
  }

  pub fn waiting(task_id: impl Into<String>, attempt: u32, prompt: PermissionPrompt) -> Self {
    Self {
      permission_prompt: Some(prompt),
      ..Self::new(task_id, attempt, TaskStatus::WaitingForPermission)
    }
  }

  /// Convert the loosely-typed report into a [`TaskState`].
  ///
  /// Fields that don't belong to the reported status are dropped. A completed
  /// report without a value completes with `null`.
  pub fn into_state(self) -> Result<TaskState, ReportError> {
    let state = match self.state {
      TaskStatus::Running => TaskState::Running,
      TaskStatus::WaitingForPermission => {
        let prompt = self.permission_prompt.ok_or(ReportError::MissingPrompt {
          task_id: self.task_id,
        })?;
        TaskState::waiting(prompt)
      }
      TaskStatus::Stopping => TaskState::Stopping,
      TaskStatus::Stopped => TaskState::Stopped,
      TaskStatus::Completed => {
        TaskState::completed(self.return_value.unwrap_or(serde_json::Value::Null))
      }
      TaskStatus::Error => TaskState::failed(
        self
          .error
          .unwrap_or_else(|| "task failed without an error message".to_string()),
      ),
    };

    Ok(state)
  }
}

/// A named event emitted by a running script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventReport {
  pub task_id: String,
  pub attempt: u32,
  pub event_name: String,
  #[serde(default)]
  pub data: serde_json::Value,
}

impl EventReport {
  pub fn new(
    task_id: impl Into<String>,
    attempt: u32,
    event_name: impl Into<String>,
    data: serde_json::Value,
  ) -> Self {
    Self {
      task_id: task_id.into(),
      attempt,
      event_name: event_name.into(),
      data,
    }
  }
}
