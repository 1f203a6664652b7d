//! A scripted sandbox host for supervisor tests.
//!
//! The host only records calls; tests play the host's side by feeding
//! notifications to the supervisor directly.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use powblocs_events::EventStream;
use powblocs_registry::TaskRegistry;
use powblocs_sandbox::{ExecutionRequest, HostError, SandboxHost};
use powblocs_supervisor::{ExecutionSupervisor, SupervisorConfig};
use powblocs_task::{PermissionDecision, Task};

#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
  Start(ExecutionRequest),
  Stop(String),
  Kill(String),
  Resolve(String, PermissionDecision),
}

#[derive(Default)]
pub struct MockHost {
  calls: Mutex<Vec<HostCall>>,
  refuse_start: Mutex<Option<String>>,
  refuse_resolve: Mutex<bool>,
}

impl MockHost {
  pub fn calls(&self) -> Vec<HostCall> {
    self.calls.lock().unwrap().clone()
  }

  /// Make every following start fail with `message`.
  pub fn refuse_start(&self, message: &str) {
    *self.refuse_start.lock().unwrap() = Some(message.to_string());
  }

  pub fn accept_start(&self) {
    *self.refuse_start.lock().unwrap() = None;
  }

  pub fn refuse_resolve(&self) {
    *self.refuse_resolve.lock().unwrap() = true;
  }

  fn record(&self, call: HostCall) {
    self.calls.lock().unwrap().push(call);
  }
}

#[async_trait]
impl SandboxHost for MockHost {
  async fn start_execution(&self, request: ExecutionRequest) -> Result<(), HostError> {
    self.record(HostCall::Start(request));
    match self.refuse_start.lock().unwrap().clone() {
      Some(message) => Err(HostError::other(message)),
      None => Ok(()),
    }
  }

  async fn stop_execution(&self, task_id: &str) -> Result<(), HostError> {
    self.record(HostCall::Stop(task_id.to_string()));
    Ok(())
  }

  async fn kill_execution(&self, task_id: &str) -> Result<(), HostError> {
    self.record(HostCall::Kill(task_id.to_string()));
    Ok(())
  }

  async fn resolve_permission(
    &self,
    task_id: &str,
    decision: PermissionDecision,
  ) -> Result<(), HostError> {
    self.record(HostCall::Resolve(task_id.to_string(), decision));
    if *self.refuse_resolve.lock().unwrap() {
      return Err(HostError::InputClosed {
        task_id: task_id.to_string(),
      });
    }
    Ok(())
  }
}

pub struct Harness {
  pub host: Arc<MockHost>,
  pub registry: Arc<TaskRegistry>,
  pub events: Arc<EventStream>,
  pub supervisor: ExecutionSupervisor<MockHost>,
}

impl Harness {
  pub fn new() -> Self {
    Self::with_stop_timeout(Duration::from_secs(60))
  }

  pub fn with_stop_timeout(stop_timeout: Duration) -> Self {
    let host = Arc::new(MockHost::default());
    let registry = Arc::new(TaskRegistry::new());
    let events = Arc::new(EventStream::new());
    let supervisor = ExecutionSupervisor::new(
      host.clone(),
      registry.clone(),
      events.clone(),
      SupervisorConfig::new(stop_timeout),
    );
    Self {
      host,
      registry,
      events,
      supervisor,
    }
  }

  pub fn task(&self, id: &str) -> Task {
    self.registry.get_task(id).expect("task should exist")
  }
}

/// Every snapshot a task goes through, recorded from a registry observer.
pub fn record_history(registry: &TaskRegistry, id: &str) -> (powblocs_observe::Subscription, Arc<Mutex<Vec<Task>>>) {
  let seen = Arc::new(Mutex::new(Vec::new()));
  let sink = seen.clone();
  let subscription = registry.subscribe(id, move |task: &Task| {
    sink.lock().unwrap().push(task.clone());
  });
  (subscription, seen)
}

/// The structural invariants every published task must satisfy.
pub fn assert_consistent(task: &Task) {
  assert!(
    !(task.result().is_some() && task.error().is_some()),
    "result and error both set: {task:?}"
  );
  if !task.is_terminal() {
    assert!(task.result().is_none(), "result on active task: {task:?}");
    assert!(task.error().is_none(), "error on active task: {task:?}");
  }
  assert_eq!(
    task.permission_prompt().is_some(),
    task.status() == powblocs_task::TaskStatus::WaitingForPermission,
    "prompt/state mismatch: {task:?}"
  );
}
