//! Task model errors.

/// Errors raised while turning a host report into a task state.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
  /// The host claimed the task is suspended but sent no prompt to show.
  #[error("task '{task_id}' reported waiting_for_permission without a prompt")]
  MissingPrompt { task_id: String },
}

/// A permission decision string that is not `Allow`, `Deny` or `AllowAll`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown permission decision: {0}")]
pub struct ParseDecisionError(pub String);
