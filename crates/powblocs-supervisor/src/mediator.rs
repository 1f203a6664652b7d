//! The permission mediator.

use std::sync::Arc;

use powblocs_registry::TaskRegistry;
use powblocs_sandbox::SandboxHost;
use powblocs_task::{PermissionDecision, PermissionRecord, TaskState};
use tracing::{error, info, instrument, warn};

use crate::error::SupervisorError;
use crate::supervisor::describe;

/// Resolves pending permission prompts with a human's decision.
///
/// A denied operation terminates the task: it moves to `error` and the host
/// is asked to kill the execution. Allowed operations resume the task.
pub struct PermissionMediator<H: SandboxHost> {
  host: Arc<H>,
  registry: Arc<TaskRegistry>,
}

impl<H: SandboxHost> Clone for PermissionMediator<H> {
  fn clone(&self) -> Self {
    Self {
      host: self.host.clone(),
      registry: self.registry.clone(),
    }
  }
}

impl<H: SandboxHost> PermissionMediator<H> {
  pub fn new(host: Arc<H>, registry: Arc<TaskRegistry>) -> Self {
    Self { host, registry }
  }

  /// Answer the task's pending prompt.
  ///
  /// The prompt is taken, the decision is appended to the task's permission
  /// history and the new state is published in one registry update, so a
  /// second answer to the same prompt is rejected. `AllowAll` on a unary
  /// prompt is treated as `Allow`.
  #[instrument(
    name = "permission_respond",
    skip(self),
    fields(task_id = %task_id, decision = %decision)
  )]
  pub async fn respond(
    &self,
    task_id: &str,
    decision: PermissionDecision,
  ) -> Result<(), SupervisorError> {
    let resolved = self.registry.update_task(task_id, |task| {
      let Some(prompt) = task.permission_prompt().cloned() else {
        return Err(task.status());
      };

      let decision = match decision {
        PermissionDecision::AllowAll if prompt.is_unary => PermissionDecision::Allow,
        decision => decision,
      };
      let next = match decision {
        PermissionDecision::Deny => {
          TaskState::failed(format!("permission denied: {}", prompt.message))
        }
        PermissionDecision::Allow | PermissionDecision::AllowAll => TaskState::Running,
      };

      task.record_permission(PermissionRecord::new(prompt, decision));
      task.set_state(next);
      Ok((decision, task.attempt()))
    });

    let (decision, attempt) = match resolved {
      Some(Ok(resolved)) => resolved,
      Some(Err(state)) => {
        warn!(task_id = %task_id, state = %state, "no pending permission prompt");
        return Err(SupervisorError::NoPendingPrompt {
          task_id: task_id.to_string(),
          state,
        });
      }
      None => {
        warn!(task_id = %task_id, "permission response for unknown task ignored");
        return Err(SupervisorError::TaskNotFound {
          task_id: task_id.to_string(),
        });
      }
    };

    info!(task_id = %task_id, attempt, decision = %decision, "permission_resolved");

    let forwarded = self.host.resolve_permission(task_id, decision).await;

    if decision == PermissionDecision::Deny {
      if let Err(e) = forwarded {
        warn!(task_id = %task_id, error = %describe(&e), "host did not take the denial");
      }
      if let Err(e) = self.host.kill_execution(task_id).await {
        error!(task_id = %task_id, error = %describe(&e), "host failed to kill denied task");
      }
      return Ok(());
    }

    if let Err(e) = forwarded {
      // The script can't resume without the decision.
      let message = format!("failed to deliver permission decision: {}", describe(&e));
      error!(task_id = %task_id, error = %message, "permission_forward_failed");
      self.registry.update_task(task_id, |task| {
        if task.attempt() == attempt && !task.is_terminal() {
          task.set_state(TaskState::failed(message));
        }
      });
    }

    Ok(())
  }
}
