//! A sandbox host that runs each task as a child process.
//!
//! The script is written to `<scripts_dir>/<escaped id>-<attempt>.<ext>` and
//! run as `<program> <args...> <script>`. Isolation is whatever the interpreter
//! provides (e.g. `deno run` without `--allow-*` flags). The child speaks the
//! line protocol in [`crate::protocol`].

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use powblocs_task::{EventReport, PermissionDecision, StateReport};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::HostError;
use crate::host::{ExecutionRequest, SandboxHost};
use crate::notify::{HostNotification, HostNotifier};
use crate::protocol::{HostMessage, ScriptMessage};

/// Number of stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// How long to wait for stderr to drain once the script has exited.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

/// Configuration for [`ProcessHost`].
#[derive(Debug, Clone)]
pub struct ProcessHostConfig {
  /// Interpreter to run.
  pub program: String,
  /// Arguments placed before the script path.
  pub args: Vec<String>,
  /// Extension for script files, without the dot.
  pub script_extension: String,
  /// Where script files are written.
  pub scripts_dir: PathBuf,
  /// Extra environment for every script.
  pub env: BTreeMap<String, String>,
}

impl ProcessHostConfig {
  pub fn new(program: impl Into<String>, scripts_dir: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      script_extension: "ts".to_string(),
      scripts_dir: scripts_dir.into(),
      env: BTreeMap::new(),
    }
  }

  pub fn with_args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args = args.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
    self.script_extension = extension.into();
    self
  }

  pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }

  fn script_path(&self, task_id: &str, attempt: u32) -> PathBuf {
    let file_name = format!(
      "{}-{}.{}",
      sanitize_file_stem(task_id),
      attempt,
      self.script_extension
    );
    self.scripts_dir.join(file_name)
  }
}

/// Handle on a live script process.
struct Execution {
  attempt: u32,
  input: mpsc::UnboundedSender<HostMessage>,
  kill: CancellationToken,
  stop_requested: Arc<AtomicBool>,
  awaiting_permission: Arc<AtomicBool>,
}

type Executions = Arc<Mutex<HashMap<String, Execution>>>;

/// Runs scripts as child processes of an interpreter.
pub struct ProcessHost<N: HostNotifier> {
  config: ProcessHostConfig,
  notifier: Arc<N>,
  executions: Executions,
}

impl<N: HostNotifier> ProcessHost<N> {
  pub fn new(config: ProcessHostConfig, notifier: N) -> Self {
    Self {
      config,
      notifier: Arc::new(notifier),
      executions: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  pub fn config(&self) -> &ProcessHostConfig {
    &self.config
  }

  /// Whether the task has a live process.
  pub fn is_running(&self, task_id: &str) -> bool {
    lock(&self.executions).contains_key(task_id)
  }

  /// Number of live processes.
  pub fn running_count(&self) -> usize {
    lock(&self.executions).len()
  }

  async fn write_script(&self, request: &ExecutionRequest) -> Result<PathBuf, HostError> {
    let path = self.config.script_path(&request.task_id, request.attempt);
    tokio::fs::create_dir_all(&self.config.scripts_dir)
      .await
      .map_err(|source| HostError::ScriptWrite {
        path: self.config.scripts_dir.clone(),
        source,
      })?;
    tokio::fs::write(&path, &request.code)
      .await
      .map_err(|source| HostError::ScriptWrite {
        path: path.clone(),
        source,
      })?;
    Ok(path)
  }

  fn command(&self, request: &ExecutionRequest, script: &Path) -> Command {
    let mut command = Command::new(&self.config.program);
    command
      .args(&self.config.args)
      .arg(script)
      .envs(&self.config.env)
      .env("POWBLOCS_TASK_ID", &request.task_id)
      .env("POWBLOCS_ATTEMPT", request.attempt.to_string())
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);

    if let Some(action_name) = &request.action_name {
      command.env("POWBLOCS_ACTION_NAME", action_name);
    }
    if let Some(action_input) = &request.action_input {
      command.env("POWBLOCS_ACTION_INPUT", action_input.to_string());
    }

    command
  }

  /// Look up a live execution and run `f` on it under the lock.
  fn with_execution<R>(
    &self,
    task_id: &str,
    f: impl FnOnce(&Execution) -> Result<R, HostError>,
  ) -> Result<R, HostError> {
    let executions = lock(&self.executions);
    let execution = executions.get(task_id).ok_or_else(|| HostError::NotRunning {
      task_id: task_id.to_string(),
    })?;
    f(execution)
  }
}

#[async_trait]
impl<N: HostNotifier> SandboxHost for ProcessHost<N> {
  async fn start_execution(&self, request: ExecutionRequest) -> Result<(), HostError> {
    {
      let mut executions = lock(&self.executions);
      if let Some(existing) = executions.get(&request.task_id) {
        if existing.attempt >= request.attempt {
          return Err(HostError::AlreadyRunning {
            task_id: request.task_id.clone(),
          });
        }
        // Superseded by a newer attempt.
        existing.kill.cancel();
        executions.remove(&request.task_id);
      }
    }

    let script = self.write_script(&request).await?;
    let mut child = self
      .command(&request, &script)
      .spawn()
      .map_err(|source| HostError::Spawn {
        task_id: request.task_id.clone(),
        program: self.config.program.clone(),
        source,
      })?;

    let stdin = child
      .stdin
      .take()
      .ok_or_else(|| HostError::other("script stdin was not captured"))?;
    let stdout = child
      .stdout
      .take()
      .ok_or_else(|| HostError::other("script stdout was not captured"))?;
    let stderr = child
      .stderr
      .take()
      .ok_or_else(|| HostError::other("script stderr was not captured"))?;

    let (input, input_rx) = mpsc::unbounded_channel();
    let kill = CancellationToken::new();
    let stop_requested = Arc::new(AtomicBool::new(false));
    let awaiting_permission = Arc::new(AtomicBool::new(false));

    let driver = Driver {
      task_id: request.task_id.clone(),
      attempt: request.attempt,
      script,
      notifier: self.notifier.clone(),
      executions: self.executions.clone(),
      kill: kill.clone(),
      stop_requested: stop_requested.clone(),
      awaiting_permission: awaiting_permission.clone(),
    };

    // Register before the driver runs so its cleanup always finds the entry.
    lock(&self.executions).insert(
      request.task_id.clone(),
      Execution {
        attempt: request.attempt,
        input,
        kill,
        stop_requested,
        awaiting_permission,
      },
    );

    tokio::spawn(writer_loop(stdin, input_rx));
    let stderr_tail = tokio::spawn(collect_stderr_tail(stderr));
    tokio::spawn(driver.run(child, stdout, stderr_tail));

    info!(
      task_id = %request.task_id,
      attempt = request.attempt,
      program = %self.config.program,
      "script started"
    );
    Ok(())
  }

  async fn stop_execution(&self, task_id: &str) -> Result<(), HostError> {
    self.with_execution(task_id, |execution| {
      execution.stop_requested.store(true, Ordering::SeqCst);
      // A closed input means the script is already on its way out.
      let _ = execution.input.send(HostMessage::Stop);
      Ok(())
    })?;
    debug!(task_id = %task_id, "stop requested");
    Ok(())
  }

  async fn kill_execution(&self, task_id: &str) -> Result<(), HostError> {
    if let Some(execution) = lock(&self.executions).get(task_id) {
      execution.kill.cancel();
      debug!(task_id = %task_id, "kill requested");
    }
    Ok(())
  }

  async fn resolve_permission(
    &self,
    task_id: &str,
    decision: PermissionDecision,
  ) -> Result<(), HostError> {
    let attempt = self.with_execution(task_id, |execution| {
      if !execution.awaiting_permission.swap(false, Ordering::SeqCst) {
        return Err(HostError::NoPendingPermission {
          task_id: task_id.to_string(),
        });
      }
      execution
        .input
        .send(HostMessage::PermissionResponse { decision })
        .map_err(|_| HostError::InputClosed {
          task_id: task_id.to_string(),
        })?;
      Ok(execution.attempt)
    })?;

    if decision.is_allow() {
      self
        .notifier
        .notify(HostNotification::StateChanged(StateReport::running(task_id, attempt)));
    }
    Ok(())
  }
}

/// What the script said before it exited.
#[derive(Debug, Default)]
struct ScriptOutcome {
  return_value: Option<serde_json::Value>,
  error: Option<String>,
}

/// Owns one child process until it exits, then reports the final state.
struct Driver<N: HostNotifier> {
  task_id: String,
  attempt: u32,
  script: PathBuf,
  notifier: Arc<N>,
  executions: Executions,
  kill: CancellationToken,
  stop_requested: Arc<AtomicBool>,
  awaiting_permission: Arc<AtomicBool>,
}

enum ReadStep {
  Line(String),
  Eof,
  Killed,
}

impl<N: HostNotifier> Driver<N> {
  async fn run(self, mut child: Child, stdout: ChildStdout, stderr_tail: JoinHandle<String>) {
    let mut lines = BufReader::new(stdout).lines();
    let mut outcome = ScriptOutcome::default();

    loop {
      let step = tokio::select! {
        _ = self.kill.cancelled() => ReadStep::Killed,
        line = lines.next_line() => match line {
          Ok(Some(line)) => ReadStep::Line(line),
          Ok(None) => ReadStep::Eof,
          Err(e) => {
            warn!(task_id = %self.task_id, error = %e, "failed to read script output");
            ReadStep::Eof
          }
        },
      };

      match step {
        ReadStep::Line(line) => self.handle_line(&line, &mut outcome),
        ReadStep::Eof | ReadStep::Killed => break,
      }
    }

    let exited = tokio::select! {
      status = child.wait() => Some(status),
      _ = self.kill.cancelled() => None,
    };
    let status = match exited {
      Some(status) => status,
      None => {
        let _ = child.start_kill();
        child.wait().await
      }
    };

    let stderr = match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, stderr_tail).await {
      Ok(Ok(tail)) => tail,
      _ => String::new(),
    };

    let report = self.final_report(status, outcome, &stderr);
    info!(
      task_id = %self.task_id,
      attempt = self.attempt,
      state = %report.state,
      "script exited"
    );

    {
      let mut executions = lock(&self.executions);
      if executions
        .get(&self.task_id)
        .is_some_and(|execution| execution.attempt == self.attempt)
      {
        executions.remove(&self.task_id);
      }
    }

    if let Err(e) = tokio::fs::remove_file(&self.script).await {
      debug!(path = %self.script.display(), error = %e, "failed to remove script file");
    }

    self.notifier.notify(HostNotification::StateChanged(report));
  }

  fn handle_line(&self, line: &str, outcome: &mut ScriptOutcome) {
    match ScriptMessage::parse(line) {
      Some(ScriptMessage::Return { value }) => outcome.return_value = Some(value),
      Some(ScriptMessage::Error { message }) => outcome.error = Some(message),
      Some(ScriptMessage::Event { name, data }) => {
        self.notifier.notify(HostNotification::Event(EventReport::new(
          &self.task_id,
          self.attempt,
          name,
          data,
        )));
      }
      Some(ScriptMessage::Permission(prompt)) => {
        self.awaiting_permission.store(true, Ordering::SeqCst);
        self.notifier.notify(HostNotification::StateChanged(StateReport::waiting(
          &self.task_id,
          self.attempt,
          prompt,
        )));
      }
      None => debug!(target: "powblocs::script", task_id = %self.task_id, "{}", line),
    }
  }

  fn final_report(
    &self,
    status: std::io::Result<ExitStatus>,
    outcome: ScriptOutcome,
    stderr: &str,
  ) -> StateReport {
    if self.stop_requested.load(Ordering::SeqCst) {
      return StateReport::stopped(&self.task_id, self.attempt);
    }
    if let Some(error) = outcome.error {
      return StateReport::failed(&self.task_id, self.attempt, error);
    }

    match status {
      Ok(status) if status.success() => StateReport::completed(
        &self.task_id,
        self.attempt,
        outcome.return_value.unwrap_or(serde_json::Value::Null),
      ),
      Ok(status) => {
        let mut message = format!("script exited with {status}");
        if !stderr.is_empty() {
          message.push('\n');
          message.push_str(stderr);
        }
        StateReport::failed(&self.task_id, self.attempt, message)
      }
      Err(e) => StateReport::failed(
        &self.task_id,
        self.attempt,
        format!("failed to wait for script: {e}"),
      ),
    }
  }
}

async fn writer_loop(mut stdin: ChildStdin, mut input: mpsc::UnboundedReceiver<HostMessage>) {
  while let Some(message) = input.recv().await {
    let bytes = match message.to_line() {
      Ok(bytes) => bytes,
      Err(e) => {
        warn!(error = %e, "failed to encode host message");
        continue;
      }
    };
    if stdin.write_all(&bytes).await.is_err() {
      return;
    }
    let _ = stdin.flush().await;
  }
}

async fn collect_stderr_tail(stderr: ChildStderr) -> String {
  let mut lines = BufReader::new(stderr).lines();
  let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
  while let Ok(Some(line)) = lines.next_line().await {
    if tail.len() == STDERR_TAIL_LINES {
      tail.pop_front();
    }
    tail.push_back(line);
  }
  Vec::from(tail).join("\n")
}

/// Map a task id onto a file stem that stays inside the scripts directory.
///
/// ASCII alphanumerics and `-` pass through and every other byte becomes
/// `_xx`. `_` always starts an escape, so distinct ids never share a stem.
fn sanitize_file_stem(task_id: &str) -> String {
  let mut stem = String::with_capacity(task_id.len());
  for byte in task_id.bytes() {
    if byte.is_ascii_alphanumeric() || byte == b'-' {
      stem.push(char::from(byte));
    } else {
      stem.push_str(&format!("_{byte:02x}"));
    }
  }
  stem
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|e| e.into_inner())
}
