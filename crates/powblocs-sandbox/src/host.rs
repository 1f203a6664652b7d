//! The sandbox host trait.

use async_trait::async_trait;
use powblocs_task::{PermissionDecision, Task};
use serde::{Deserialize, Serialize};

use crate::error::HostError;

/// Everything a host needs to run one attempt of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
  pub task_id: String,
  pub attempt: u32,
  pub code: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub action_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub action_input: Option<serde_json::Value>,
}

impl ExecutionRequest {
  /// Build a request for the task's current attempt.
  pub fn for_task(task: &Task) -> Self {
    Self {
      task_id: task.id().to_string(),
      attempt: task.attempt(),
      code: task.code().to_string(),
      action_name: task.action_name().map(str::to_string),
      action_input: task.action_input().cloned(),
    }
  }
}

/// Runs scripts in isolation on behalf of the execution bridge.
///
/// Every method is an acknowledgement: it returns once the host accepted
/// (or refused) the request, never after the script finished. State changes
/// and events are reported asynchronously through the host's
/// [`HostNotifier`](crate::HostNotifier).
#[async_trait]
pub trait SandboxHost: Send + Sync + 'static {
  /// Begin running `request.code` under `request.task_id`.
  async fn start_execution(&self, request: ExecutionRequest) -> Result<(), HostError>;

  /// Ask the script to stop. Cooperative: the host reports `stopped` once the
  /// script is actually gone.
  async fn stop_execution(&self, task_id: &str) -> Result<(), HostError>;

  /// Terminate the script immediately. Succeeds if nothing is running.
  async fn kill_execution(&self, task_id: &str) -> Result<(), HostError>;

  /// Forward a human decision for the task's pending permission prompt.
  async fn resolve_permission(
    &self,
    task_id: &str,
    decision: PermissionDecision,
  ) -> Result<(), HostError>;
}
