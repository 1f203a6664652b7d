//! The task record.

use serde::{Deserialize, Serialize};

use crate::permission::{PermissionPrompt, PermissionRecord};
use crate::state::{TaskState, TaskStatus};

/// A single tracked execution of a script.
///
/// The script snapshot (`code`, `action_name`, `action_input`) is fixed at
/// creation; a replay reruns it verbatim under a new attempt number.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "TaskView")]
pub struct Task {
  id: String,
  code: String,
  action_name: Option<String>,
  action_input: Option<serde_json::Value>,
  attempt: u32,
  state: TaskState,
  permission_history: Vec<PermissionRecord>,
}

impl Task {
  /// Create a task in the `running` state, on its first attempt.
  pub fn new(
    id: impl Into<String>,
    code: impl Into<String>,
    action_name: Option<String>,
    action_input: Option<serde_json::Value>,
  ) -> Self {
    Self {
      id: id.into(),
      code: code.into(),
      action_name,
      action_input,
      attempt: 1,
      state: TaskState::Running,
      permission_history: Vec::new(),
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn code(&self) -> &str {
    &self.code
  }

  pub fn action_name(&self) -> Option<&str> {
    self.action_name.as_deref()
  }

  pub fn action_input(&self) -> Option<&serde_json::Value> {
    self.action_input.as_ref()
  }

  pub fn attempt(&self) -> u32 {
    self.attempt
  }

  pub fn state(&self) -> &TaskState {
    &self.state
  }

  pub fn status(&self) -> TaskStatus {
    self.state.status()
  }

  pub fn is_terminal(&self) -> bool {
    self.state.is_terminal()
  }

  pub fn result(&self) -> Option<&serde_json::Value> {
    self.state.result()
  }

  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  pub fn permission_prompt(&self) -> Option<&PermissionPrompt> {
    self.state.permission_prompt()
  }

  pub fn permission_history(&self) -> &[PermissionRecord] {
    &self.permission_history
  }

  pub fn set_state(&mut self, state: TaskState) {
    self.state = state;
  }

  /// Append a resolved prompt to the history.
  pub fn record_permission(&mut self, record: PermissionRecord) {
    self.permission_history.push(record);
  }

  /// Reset to `running` for a new attempt and return the attempt number.
  ///
  /// Result, error and prompt go away with the old state; the permission
  /// history is kept.
  pub fn restart(&mut self) -> u32 {
    self.attempt += 1;
    self.state = TaskState::Running;
    self.attempt
  }

  pub fn view(&self) -> TaskView {
    TaskView::from(self)
  }
}

/// Flat, serializable snapshot of a [`Task`] for UI consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
  pub id: String,
  pub code: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub action_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub action_input: Option<serde_json::Value>,
  pub attempt: u32,
  pub state: TaskStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub permission_prompt: Option<PermissionPrompt>,
  #[serde(default)]
  pub permission_history: Vec<PermissionRecord>,
}

impl From<&Task> for TaskView {
  fn from(task: &Task) -> Self {
    Self {
      id: task.id.clone(),
      code: task.code.clone(),
      action_name: task.action_name.clone(),
      action_input: task.action_input.clone(),
      attempt: task.attempt,
      state: task.status(),
      result: task.result().cloned(),
      error: task.error().map(str::to_string),
      permission_prompt: task.permission_prompt().cloned(),
      permission_history: task.permission_history.clone(),
    }
  }
}

impl From<Task> for TaskView {
  fn from(task: Task) -> Self {
    TaskView::from(&task)
  }
}
