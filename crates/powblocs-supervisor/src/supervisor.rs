//! The execution supervisor.

use std::sync::Arc;
use std::time::Duration;

use powblocs_events::EventStream;
use powblocs_registry::TaskRegistry;
use powblocs_sandbox::{ExecutionRequest, HostNotification, SandboxHost};
use powblocs_task::{EventReport, StateReport, TaskState, TaskStatus};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::SupervisorError;
use crate::mediator::PermissionMediator;
use crate::transition::{self, Plan};

/// Supervisor tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
  /// How long a task may stay `stopping` before it is killed.
  pub stop_timeout: Duration,
}

impl SupervisorConfig {
  pub fn new(stop_timeout: Duration) -> Self {
    Self { stop_timeout }
  }
}

impl Default for SupervisorConfig {
  fn default() -> Self {
    Self::new(Duration::from_secs(5))
  }
}

/// A request to run a script.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
  /// Task id to use; a random one is generated when absent.
  pub task_id: Option<String>,
  pub code: String,
  pub action_name: Option<String>,
  pub action_input: Option<serde_json::Value>,
}

impl RunRequest {
  pub fn new(code: impl Into<String>) -> Self {
    Self {
      task_id: None,
      code: code.into(),
      action_name: None,
      action_input: None,
    }
  }

  pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
    self.task_id = Some(task_id.into());
    self
  }

  pub fn with_action(mut self, name: impl Into<String>, input: Option<serde_json::Value>) -> Self {
    self.action_name = Some(name.into());
    self.action_input = input;
    self
  }
}

/// Runs, replays and stops tasks, and applies what the host reports back.
///
/// # Usage
///
/// ```ignore
/// let (notifier, notifications) = ChannelNotifier::channel();
/// let host = Arc::new(ProcessHost::new(host_config, notifier));
/// let supervisor = ExecutionSupervisor::new(host, registry, events, SupervisorConfig::default());
///
/// // Apply host notifications in the background
/// let cancel = CancellationToken::new();
/// tokio::spawn(supervisor.clone().listen(notifications, cancel.clone()));
///
/// let task_id = supervisor.run(RunRequest::new(code)).await?;
/// ```
pub struct ExecutionSupervisor<H: SandboxHost> {
  host: Arc<H>,
  registry: Arc<TaskRegistry>,
  events: Arc<EventStream>,
  config: SupervisorConfig,
}

impl<H: SandboxHost> Clone for ExecutionSupervisor<H> {
  fn clone(&self) -> Self {
    Self {
      host: self.host.clone(),
      registry: self.registry.clone(),
      events: self.events.clone(),
      config: self.config.clone(),
    }
  }
}

impl<H: SandboxHost> ExecutionSupervisor<H> {
  pub fn new(
    host: Arc<H>,
    registry: Arc<TaskRegistry>,
    events: Arc<EventStream>,
    config: SupervisorConfig,
  ) -> Self {
    Self {
      host,
      registry,
      events,
      config,
    }
  }

  pub fn registry(&self) -> &Arc<TaskRegistry> {
    &self.registry
  }

  pub fn events(&self) -> &Arc<EventStream> {
    &self.events
  }

  pub fn host(&self) -> &Arc<H> {
    &self.host
  }

  /// The mediator for this supervisor's tasks.
  pub fn mediator(&self) -> PermissionMediator<H> {
    PermissionMediator::new(self.host.clone(), self.registry.clone())
  }

  /// Register a task and ask the host to start it.
  ///
  /// Returns the task id once the host has acknowledged (or refused) the
  /// start. A refusal is recorded as the task's `error` state; the only error
  /// returned here is a duplicate task id.
  #[instrument(
    name = "task_run",
    skip(self, request),
    fields(task_id = tracing::field::Empty)
  )]
  pub async fn run(&self, request: RunRequest) -> Result<String, SupervisorError> {
    let task_id = request
      .task_id
      .unwrap_or_else(|| Uuid::new_v4().to_string());
    tracing::Span::current().record("task_id", task_id.as_str());

    let task = self.registry.create_task(
      task_id.clone(),
      request.code,
      request.action_name,
      request.action_input,
    )?;
    info!(task_id = %task_id, "task_started");

    self.start(ExecutionRequest::for_task(&task)).await;
    Ok(task_id)
  }

  /// Run a finished task again with the same script and action.
  ///
  /// The task moves back to `running` under a new attempt; result, error
  /// and prompt are cleared, permission history and events are kept.
  #[instrument(name = "task_replay", skip(self), fields(task_id = %task_id))]
  pub async fn replay(&self, task_id: &str) -> Result<(), SupervisorError> {
    let restarted = self.registry.update_task(task_id, |task| {
      if !task.is_terminal() {
        return Err(task.status());
      }
      task.restart();
      Ok(ExecutionRequest::for_task(task))
    });

    let request = match restarted {
      Some(Ok(request)) => request,
      Some(Err(state)) => {
        warn!(task_id = %task_id, state = %state, "replay rejected: task is still active");
        return Err(SupervisorError::InvalidState {
          task_id: task_id.to_string(),
          state,
        });
      }
      None => return Err(not_found(task_id)),
    };

    info!(task_id = %task_id, attempt = request.attempt, "task_replayed");
    self.start(request).await;
    Ok(())
  }

  /// Ask the host to stop a task.
  ///
  /// The task is `stopping` before this returns. If the host has not
  /// confirmed within the configured stop timeout, the execution is killed
  /// and the task is marked `stopped`.
  #[instrument(name = "task_stop", skip(self), fields(task_id = %task_id))]
  pub async fn stop(&self, task_id: &str) -> Result<(), SupervisorError> {
    let accepted = self.registry.update_task(task_id, |task| match task.status() {
      TaskStatus::Running | TaskStatus::WaitingForPermission => {
        task.set_state(TaskState::Stopping);
        Ok(task.attempt())
      }
      state => Err(state),
    });

    let attempt = match accepted {
      Some(Ok(attempt)) => attempt,
      Some(Err(state)) => {
        warn!(task_id = %task_id, state = %state, "stop rejected");
        return Err(SupervisorError::InvalidState {
          task_id: task_id.to_string(),
          state,
        });
      }
      None => return Err(not_found(task_id)),
    };

    info!(task_id = %task_id, attempt, "task_stopping");
    if let Err(e) = self.host.stop_execution(task_id).await {
      error!(task_id = %task_id, error = %describe(&e), "host failed to stop task");
    }

    self.arm_stop_watchdog(task_id.to_string(), attempt);
    Ok(())
  }

  /// Remove finished tasks nobody is watching, along with their events.
  ///
  /// Returns how many tasks were removed.
  pub fn clear_completed(&self) -> usize {
    let removed = self.registry.remove_completed();
    for task_id in &removed {
      self.events.clear(task_id);
    }
    if !removed.is_empty() {
      info!(removed = removed.len(), "completed tasks cleared");
    }
    removed.len()
  }

  /// Apply one host notification.
  pub fn handle_notification(&self, notification: HostNotification) {
    match notification {
      HostNotification::StateChanged(report) => self.apply_state(report),
      HostNotification::Event(report) => self.apply_event(report),
    }
  }

  /// Apply host notifications in arrival order until cancelled or the
  /// channel closes.
  pub async fn listen(
    self,
    mut notifications: mpsc::UnboundedReceiver<HostNotification>,
    cancel: CancellationToken,
  ) {
    info!("supervisor listening for host notifications");

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!("supervisor listener cancelled");
          break;
        }
        notification = notifications.recv() => match notification {
          Some(notification) => self.handle_notification(notification),
          None => {
            info!("host notification channel closed");
            break;
          }
        }
      }
    }
  }

  async fn start(&self, request: ExecutionRequest) {
    let task_id = request.task_id.clone();
    let attempt = request.attempt;

    if let Err(e) = self.host.start_execution(request).await {
      let message = describe(&e);
      error!(task_id = %task_id, attempt, error = %message, "task_start_failed");
      self.registry.update_task(&task_id, |task| {
        if task.attempt() == attempt && !task.is_terminal() {
          task.set_state(TaskState::failed(message));
        }
      });
    }
  }

  fn apply_state(&self, report: StateReport) {
    let task_id = report.task_id.clone();
    let attempt = report.attempt;

    let applied = self.registry.update_task(&task_id, |task| {
      let from = task.status();
      match transition::plan(task, report) {
        Plan::Apply(next) => {
          let to = next.status();
          task.set_state(next);
          Ok(Applied::Changed { from, to })
        }
        Plan::StopThenStopped => {
          task.set_state(TaskState::Stopping);
          Ok(Applied::StoppedByHost { from })
        }
        Plan::Ignore(reason) => Err(reason),
      }
    });

    match applied {
      None => {}
      Some(Ok(Applied::Changed { from, to })) => {
        info!(task_id = %task_id, attempt, from = %from, to = %to, "task_state_changed");
      }
      Some(Ok(Applied::StoppedByHost { from })) => {
        info!(task_id = %task_id, attempt, from = %from, "task stopped by host");
        self.registry.update_task(&task_id, |task| {
          if task.attempt() == attempt && task.status() == TaskStatus::Stopping {
            task.set_state(TaskState::Stopped);
          }
        });
      }
      Some(Err(reason)) if reason.is_expected() => {
        debug!(task_id = %task_id, attempt, reason = %reason, "state report ignored");
      }
      Some(Err(reason)) => {
        warn!(task_id = %task_id, attempt, reason = %reason, "state report rejected");
      }
    }
  }

  fn apply_event(&self, report: EventReport) {
    let Some(task) = self.registry.get_task(&report.task_id) else {
      warn!(task_id = %report.task_id, event_name = %report.event_name, "event for unknown task ignored");
      return;
    };
    if task.attempt() != report.attempt {
      debug!(
        task_id = %report.task_id,
        attempt = report.attempt,
        current = task.attempt(),
        "event from stale attempt ignored"
      );
      return;
    }

    self
      .events
      .append(&report.task_id, report.event_name, report.data);
  }

  fn arm_stop_watchdog(&self, task_id: String, attempt: u32) {
    let supervisor = self.clone();
    tokio::spawn(async move {
      tokio::time::sleep(supervisor.config.stop_timeout).await;

      let still_stopping = supervisor
        .registry
        .get_task(&task_id)
        .is_some_and(|task| task.attempt() == attempt && task.status() == TaskStatus::Stopping);
      if !still_stopping {
        return;
      }

      warn!(
        task_id = %task_id,
        attempt,
        timeout_ms = supervisor.config.stop_timeout.as_millis() as u64,
        "task did not stop in time, killing"
      );
      if let Err(e) = supervisor.host.kill_execution(&task_id).await {
        error!(task_id = %task_id, error = %describe(&e), "host failed to kill task");
      }

      supervisor.registry.update_task(&task_id, |task| {
        if task.attempt() == attempt && task.status() == TaskStatus::Stopping {
          task.set_state(TaskState::Stopped);
        }
      });
    });
  }
}

enum Applied {
  Changed { from: TaskStatus, to: TaskStatus },
  StoppedByHost { from: TaskStatus },
}

fn not_found(task_id: &str) -> SupervisorError {
  warn!(task_id = %task_id, "operation on unknown task ignored");
  SupervisorError::TaskNotFound {
    task_id: task_id.to_string(),
  }
}

/// Render an error with its sources, `outer: inner: root`.
pub(crate) fn describe(error: &dyn std::error::Error) -> String {
  let mut message = error.to_string();
  let mut source = error.source();
  while let Some(cause) = source {
    message.push_str(": ");
    message.push_str(&cause.to_string());
    source = cause.source();
  }
  message
}
