//! Deciding what a host state report does to a task.

use std::fmt;

use powblocs_task::{ReportError, StateReport, Task, TaskState, TaskStatus};

/// What to do with a state report.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Plan {
  /// Replace the task's state.
  Apply(TaskState),
  /// The host stopped the task on its own: go through `stopping` first.
  StopThenStopped,
  /// Leave the task alone.
  Ignore(Ignored),
}

/// Why a report was not applied.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Ignored {
  Stale { current: u32 },
  Terminal(TaskStatus),
  Unchanged,
  WhileStopping(TaskStatus),
  Invalid { from: TaskStatus, to: TaskStatus },
  Malformed(String),
}

impl Ignored {
  /// Stale and post-terminal reports are expected around replays and stops.
  pub(crate) fn is_expected(&self) -> bool {
    matches!(
      self,
      Self::Stale { .. } | Self::Terminal(_) | Self::Unchanged | Self::WhileStopping(_)
    )
  }
}

impl fmt::Display for Ignored {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Stale { current } => write!(f, "stale attempt (current attempt is {current})"),
      Self::Terminal(status) => write!(f, "task is already {status}"),
      Self::Unchanged => write!(f, "state unchanged"),
      Self::WhileStopping(status) => write!(f, "{status} report while stopping"),
      Self::Invalid { from, to } => write!(f, "invalid transition {from} -> {to}"),
      Self::Malformed(message) => write!(f, "malformed report: {message}"),
    }
  }
}

impl From<ReportError> for Ignored {
  fn from(e: ReportError) -> Self {
    Self::Malformed(e.to_string())
  }
}

/// Plan the effect of `report` on `task`.
pub(crate) fn plan(task: &Task, report: StateReport) -> Plan {
  if report.attempt != task.attempt() {
    return Plan::Ignore(Ignored::Stale {
      current: task.attempt(),
    });
  }

  let from = task.status();
  if from.is_terminal() {
    return Plan::Ignore(Ignored::Terminal(from));
  }

  let next = match report.into_state() {
    Ok(next) => next,
    Err(e) => return Plan::Ignore(e.into()),
  };
  let to = next.status();

  if from == TaskStatus::Stopping {
    // Any exit of the script confirms the stop.
    return if to.is_terminal() {
      Plan::Apply(TaskState::Stopped)
    } else {
      Plan::Ignore(Ignored::WhileStopping(to))
    };
  }

  if &next == task.state() {
    return Plan::Ignore(Ignored::Unchanged);
  }

  // A fresh prompt while already waiting replaces the old one.
  if from == to {
    return Plan::Apply(next);
  }

  if to == TaskStatus::Stopped && from != TaskStatus::Stopping {
    return Plan::StopThenStopped;
  }

  if !from.can_transition_to(to) {
    return Plan::Ignore(Ignored::Invalid { from, to });
  }

  Plan::Apply(next)
}

#[cfg(test)]
mod tests {
  use super::*;
  use powblocs_task::PermissionPrompt;
  use serde_json::json;

  fn task_in(state: TaskState) -> Task {
    let mut task = Task::new("t1", "code", None, None);
    task.set_state(state);
    task
  }

  fn prompt() -> PermissionPrompt {
    PermissionPrompt::new("write", "write ./out.txt")
  }

  #[test]
  fn test_running_to_completed() {
    let task = task_in(TaskState::Running);
    assert_eq!(
      plan(&task, StateReport::completed("t1", 1, json!(1))),
      Plan::Apply(TaskState::completed(json!(1)))
    );
  }

  #[test]
  fn test_running_to_waiting() {
    let task = task_in(TaskState::Running);
    assert_eq!(
      plan(&task, StateReport::waiting("t1", 1, prompt())),
      Plan::Apply(TaskState::waiting(prompt()))
    );
  }

  #[test]
  fn test_waiting_to_running() {
    let task = task_in(TaskState::waiting(prompt()));
    assert_eq!(
      plan(&task, StateReport::running("t1", 1)),
      Plan::Apply(TaskState::Running)
    );
  }

  #[test]
  fn test_new_prompt_replaces_pending_prompt() {
    let task = task_in(TaskState::waiting(prompt()));
    let other = PermissionPrompt::new("net", "connect to example.com");
    assert_eq!(
      plan(&task, StateReport::waiting("t1", 1, other.clone())),
      Plan::Apply(TaskState::waiting(other))
    );
  }

  #[test]
  fn test_stale_attempt_is_ignored() {
    let mut task = task_in(TaskState::failed("boom"));
    task.restart();
    assert_eq!(
      plan(&task, StateReport::completed("t1", 1, json!(1))),
      Plan::Ignore(Ignored::Stale { current: 2 })
    );
  }

  #[test]
  fn test_terminal_tasks_are_frozen() {
    for state in [
      TaskState::completed(json!(1)),
      TaskState::failed("boom"),
      TaskState::Stopped,
    ] {
      let status = state.status();
      let task = task_in(state);
      assert_eq!(
        plan(&task, StateReport::running("t1", 1)),
        Plan::Ignore(Ignored::Terminal(status))
      );
    }
  }

  #[test]
  fn test_resume_while_stopping_is_ignored() {
    let task = task_in(TaskState::Stopping);
    assert_eq!(
      plan(&task, StateReport::running("t1", 1)),
      Plan::Ignore(Ignored::WhileStopping(TaskStatus::Running))
    );
    assert_eq!(
      plan(&task, StateReport::waiting("t1", 1, prompt())),
      Plan::Ignore(Ignored::WhileStopping(TaskStatus::WaitingForPermission))
    );
  }

  #[test]
  fn test_any_exit_while_stopping_is_stopped() {
    let task = task_in(TaskState::Stopping);
    for report in [
      StateReport::stopped("t1", 1),
      StateReport::completed("t1", 1, json!(null)),
      StateReport::failed("t1", 1, "killed"),
    ] {
      assert_eq!(plan(&task, report), Plan::Apply(TaskState::Stopped));
    }
  }

  #[test]
  fn test_unrequested_stop_goes_through_stopping() {
    let task = task_in(TaskState::Running);
    assert_eq!(
      plan(&task, StateReport::stopped("t1", 1)),
      Plan::StopThenStopped
    );

    let task = task_in(TaskState::waiting(prompt()));
    assert_eq!(
      plan(&task, StateReport::stopped("t1", 1)),
      Plan::StopThenStopped
    );
  }

  #[test]
  fn test_duplicate_report_is_unchanged() {
    let task = task_in(TaskState::Running);
    assert_eq!(
      plan(&task, StateReport::running("t1", 1)),
      Plan::Ignore(Ignored::Unchanged)
    );
  }

  #[test]
  fn test_waiting_without_prompt_is_malformed() {
    let task = task_in(TaskState::Running);
    let report = StateReport::new("t1", 1, TaskStatus::WaitingForPermission);
    assert!(matches!(
      plan(&task, report),
      Plan::Ignore(Ignored::Malformed(_))
    ));
  }
}
