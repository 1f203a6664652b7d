//! The supervisor driving real `sh` scripts through a `ProcessHost`.
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use powblocs_events::EventStream;
use powblocs_registry::TaskRegistry;
use powblocs_sandbox::{ChannelNotifier, ProcessHost, ProcessHostConfig};
use powblocs_supervisor::{ExecutionSupervisor, RunRequest, SupervisorConfig};
use powblocs_task::{PermissionDecision, Task, TaskStatus};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(10);

struct Bridge {
  supervisor: ExecutionSupervisor<ProcessHost<ChannelNotifier>>,
  cancel: CancellationToken,
  _dir: tempfile::TempDir,
}

impl Bridge {
  fn new(stop_timeout: Duration) -> Self {
    let dir = tempfile::tempdir().unwrap();
    let (notifier, notifications) = ChannelNotifier::channel();
    let config = ProcessHostConfig::new("sh", dir.path().join("scripts")).with_extension("sh");
    let supervisor = ExecutionSupervisor::new(
      Arc::new(ProcessHost::new(config, notifier)),
      Arc::new(TaskRegistry::new()),
      Arc::new(EventStream::new()),
      SupervisorConfig::new(stop_timeout),
    );

    let cancel = CancellationToken::new();
    tokio::spawn(supervisor.clone().listen(notifications, cancel.clone()));

    Self {
      supervisor,
      cancel,
      _dir: dir,
    }
  }
}

impl Drop for Bridge {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

async fn wait_for(updates: &mut UnboundedReceiver<Task>, status: TaskStatus) -> Task {
  tokio::time::timeout(WAIT, async {
    loop {
      let task = updates.recv().await.expect("registry subscription closed");
      if task.status() == status {
        return task;
      }
    }
  })
  .await
  .unwrap_or_else(|_| panic!("timed out waiting for {status}"))
}

#[tokio::test]
async fn test_script_returns_value() {
  let bridge = Bridge::new(Duration::from_secs(5));
  let registry = bridge.supervisor.registry().clone();

  let code = r#"
echo '{"type":"event","name":"progress","data":{"progress":0}}'
echo '{"type":"event","name":"progress","data":{"progress":1}}'
echo '{"type":"return","value":{"x":1}}'
"#;
  let id = bridge
    .supervisor
    .run(RunRequest::new(code).with_task_id("t1"))
    .await
    .unwrap();
  let (_subscription, mut updates) = registry.subscribe_channel(&id);

  let task = match registry.get_task(&id) {
    Some(task) if task.status() == TaskStatus::Completed => task,
    _ => wait_for(&mut updates, TaskStatus::Completed).await,
  };
  assert_eq!(task.result(), Some(&json!({"x": 1})));

  let progress: Vec<_> = bridge
    .supervisor
    .events()
    .events("t1")
    .into_iter()
    .map(|event| event.data["progress"].clone())
    .collect();
  assert_eq!(progress, vec![json!(0), json!(1)]);
}

#[tokio::test]
async fn test_permission_allow_then_complete() {
  let bridge = Bridge::new(Duration::from_secs(5));
  let registry = bridge.supervisor.registry().clone();

  let code = r#"
echo '{"type":"permission","name":"write","api_name":"Deno.writeTextFile","message":"write ./out.txt"}'
read line
case "$line" in
  *Allow*) echo '{"type":"return","value":"written"}' ;;
  *) exit 3 ;;
esac
"#;
  let id = bridge
    .supervisor
    .run(RunRequest::new(code).with_task_id("t2"))
    .await
    .unwrap();
  let (_subscription, mut updates) = registry.subscribe_channel(&id);

  let task = match registry.get_task(&id) {
    Some(task) if task.status() == TaskStatus::WaitingForPermission => task,
    _ => wait_for(&mut updates, TaskStatus::WaitingForPermission).await,
  };
  assert_eq!(task.permission_prompt().unwrap().name, "write");

  bridge
    .supervisor
    .mediator()
    .respond(&id, PermissionDecision::Allow)
    .await
    .unwrap();
  assert_eq!(registry.get_task(&id).unwrap().status(), TaskStatus::Running);

  let task = wait_for(&mut updates, TaskStatus::Completed).await;
  assert_eq!(task.result(), Some(&json!("written")));
  assert_eq!(task.permission_history().len(), 1);
}

#[tokio::test]
async fn test_permission_deny_kills_script() {
  let bridge = Bridge::new(Duration::from_secs(5));
  let registry = bridge.supervisor.registry().clone();

  let code = r#"
echo '{"type":"permission","name":"run","message":"run rm -rf /"}'
exec sleep 30
"#;
  let id = bridge
    .supervisor
    .run(RunRequest::new(code).with_task_id("t1"))
    .await
    .unwrap();
  let (_subscription, mut updates) = registry.subscribe_channel(&id);
  if registry.get_task(&id).unwrap().status() != TaskStatus::WaitingForPermission {
    wait_for(&mut updates, TaskStatus::WaitingForPermission).await;
  }

  bridge
    .supervisor
    .mediator()
    .respond(&id, PermissionDecision::Deny)
    .await
    .unwrap();

  let task = registry.get_task(&id).unwrap();
  assert_eq!(task.status(), TaskStatus::Error);
  assert_eq!(task.error(), Some("permission denied: run rm -rf /"));

  tokio::time::timeout(WAIT, async {
    while bridge.supervisor.host().is_running(&id) {
      tokio::time::sleep(Duration::from_millis(20)).await;
    }
  })
  .await
  .expect("denied script should be killed");
}

#[tokio::test]
async fn test_stop_then_replay() {
  let bridge = Bridge::new(Duration::from_secs(5));
  let registry = bridge.supervisor.registry().clone();

  let code = r#"
while read line; do
  case "$line" in
    *stop*) exit 0 ;;
  esac
done
"#;
  let id = bridge
    .supervisor
    .run(RunRequest::new(code).with_task_id("t4"))
    .await
    .unwrap();
  let (_subscription, mut updates) = registry.subscribe_channel(&id);

  bridge.supervisor.stop(&id).await.unwrap();
  assert_eq!(registry.get_task(&id).unwrap().status(), TaskStatus::Stopping);

  wait_for(&mut updates, TaskStatus::Stopped).await;

  bridge.supervisor.replay(&id).await.unwrap();
  let task = registry.get_task(&id).unwrap();
  assert_eq!(task.status(), TaskStatus::Running);
  assert_eq!(task.attempt(), 2);

  bridge.supervisor.stop(&id).await.unwrap();
  wait_for(&mut updates, TaskStatus::Stopped).await;
}

#[tokio::test]
async fn test_stop_timeout_kills_script_that_ignores_stop() {
  let bridge = Bridge::new(Duration::from_millis(100));
  let registry = bridge.supervisor.registry().clone();

  let id = bridge
    .supervisor
    .run(RunRequest::new("exec sleep 30\n").with_task_id("t1"))
    .await
    .unwrap();
  let (_subscription, mut updates) = registry.subscribe_channel(&id);

  bridge.supervisor.stop(&id).await.unwrap();
  wait_for(&mut updates, TaskStatus::Stopped).await;
}

#[tokio::test]
async fn test_missing_interpreter_fails_task() {
  let dir = tempfile::tempdir().unwrap();
  let (notifier, _notifications) = ChannelNotifier::channel();
  let config = ProcessHostConfig::new("/nonexistent/powblocs-interpreter", dir.path());
  let supervisor = ExecutionSupervisor::new(
    Arc::new(ProcessHost::new(config, notifier)),
    Arc::new(TaskRegistry::new()),
    Arc::new(EventStream::new()),
    SupervisorConfig::default(),
  );

  let id = supervisor.run(RunRequest::new("whatever")).await.unwrap();

  let task = supervisor.registry().get_task(&id).unwrap();
  assert_eq!(task.status(), TaskStatus::Error);
  assert!(
    task
      .error()
      .unwrap()
      .starts_with("failed to spawn '/nonexistent/powblocs-interpreter'"),
    "{:?}",
    task.error()
  );
}
