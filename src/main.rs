use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use powblocs_config::BridgeConfig;
use powblocs_events::EventStream;
use powblocs_registry::TaskRegistry;
use powblocs_sandbox::{ChannelNotifier, ProcessHost, ProcessHostConfig};
use powblocs_supervisor::{ExecutionSupervisor, RunRequest, SupervisorConfig};
use powblocs_task::{PermissionDecision, PermissionPrompt, Task, TaskEvent, TaskStatus};

/// PowBlocs - run sandboxed scripts with runtime permission prompts
#[derive(Parser)]
#[command(name = "powblocs")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.powblocs)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Path to a JSON config file (default: <data-dir>/config.json if present)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a script and wait for it to finish
  Run {
    /// Path to the script
    script: PathBuf,

    /// Action to invoke inside the script
    #[arg(long)]
    action: Option<String>,

    /// JSON input for the action
    #[arg(long)]
    input: Option<String>,

    /// Allow every permission request without asking
    #[arg(long)]
    yes: bool,

    /// Interpreter to run the script with
    #[arg(long)]
    program: Option<String>,

    /// Interpreter argument, repeatable (replaces the configured arguments)
    #[arg(long = "arg", allow_hyphen_values = true)]
    args: Vec<String>,
  },
}

struct RunOptions {
  script: PathBuf,
  action: Option<String>,
  input: Option<String>,
  yes: bool,
  program: Option<String>,
  args: Vec<String>,
}

fn main() -> Result<ExitCode> {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "powblocs=info".into()),
    )
    .with_writer(io::stderr)
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(data_dir) => data_dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".powblocs"),
  };

  match cli.command {
    Some(Commands::Run {
      script,
      action,
      input,
      yes,
      program,
      args,
    }) => {
      let config = load_config(cli.config.as_deref(), &data_dir)?;
      let options = RunOptions {
        script,
        action,
        input,
        yes,
        program,
        args,
      };

      let rt = tokio::runtime::Runtime::new()?;
      let status = rt.block_on(run_script(options, config, data_dir))?;
      if status == TaskStatus::Error {
        return Ok(ExitCode::FAILURE);
      }
    }
    None => {
      println!("powblocs - use --help to see available commands");
    }
  }

  Ok(ExitCode::SUCCESS)
}

fn load_config(path: Option<&Path>, data_dir: &Path) -> Result<BridgeConfig> {
  if let Some(path) = path {
    return BridgeConfig::from_file(path).context("failed to load config");
  }

  let default_path = data_dir.join("config.json");
  if default_path.exists() {
    return BridgeConfig::from_file(&default_path).context("failed to load config");
  }

  Ok(BridgeConfig::default())
}

async fn run_script(options: RunOptions, config: BridgeConfig, data_dir: PathBuf) -> Result<TaskStatus> {
  let code = tokio::fs::read_to_string(&options.script)
    .await
    .with_context(|| format!("failed to read script: {}", options.script.display()))?;

  let action_input = options
    .input
    .as_deref()
    .map(serde_json::from_str::<serde_json::Value>)
    .transpose()
    .context("--input must be valid JSON")?;

  let host_config = host_config(&config, &options, &data_dir);
  let (notifier, notifications) = ChannelNotifier::channel();
  let host = Arc::new(ProcessHost::new(host_config, notifier));
  let registry = Arc::new(TaskRegistry::new());
  let events = Arc::new(EventStream::new());
  let supervisor = ExecutionSupervisor::new(
    host,
    registry.clone(),
    events.clone(),
    SupervisorConfig::new(config.stop_timeout()),
  );
  let mediator = supervisor.mediator();

  let cancel = CancellationToken::new();
  let listener = tokio::spawn(supervisor.clone().listen(notifications, cancel.clone()));

  // Subscribe before the task exists so no update is missed.
  let task_id = Uuid::new_v4().to_string();
  let (tasks_tx, mut tasks) = mpsc::unbounded_channel();
  let watched = task_id.clone();
  let _tasks_subscription = registry.subscribe_all(move |all: &[Task]| {
    if let Some(task) = all.iter().find(|task| task.id() == watched) {
      let _ = tasks_tx.send(task.clone());
    }
  });
  let (_events_subscription, mut event_sequences) = events.subscribe_channel(&task_id);

  let auto_allow = options.yes;
  let mut answers = if auto_allow {
    None
  } else {
    Some(spawn_stdin_reader())
  };

  let mut request = RunRequest::new(code).with_task_id(task_id.clone());
  request.action_name = options.action;
  request.action_input = action_input;
  supervisor
    .run(request)
    .await
    .context("failed to run script")?;

  let ctrl_c = tokio::signal::ctrl_c();
  tokio::pin!(ctrl_c);
  let mut stop_requested = false;
  let mut printed = 0;
  let mut pending: Option<PermissionPrompt> = None;

  let finished = loop {
    tokio::select! {
      _ = &mut ctrl_c, if !stop_requested => {
        stop_requested = true;
        eprintln!("stopping...");
        if let Err(e) = supervisor.stop(&task_id).await {
          warn!(error = %e, "stop request rejected");
        }
      }
      Some(sequence) = event_sequences.recv() => {
        print_new_events(&sequence, &mut printed);
      }
      answer = next_answer(&mut answers), if pending.is_some() => {
        let Some(prompt) = pending.clone() else { continue };
        let decision = match answer {
          Some(line) => match parse_answer(&line, prompt.is_unary) {
            Some(decision) => decision,
            None => {
              ask(&prompt);
              continue;
            }
          },
          None => {
            eprintln!("stdin closed, denying");
            answers = None;
            PermissionDecision::Deny
          }
        };
        pending = None;
        if let Err(e) = mediator.respond(&task_id, decision).await {
          warn!(error = %e, "permission response rejected");
        }
      }
      task = tasks.recv() => {
        let Some(task) = task else { break None };
        if task.is_terminal() {
          break Some(task);
        }
        match task.permission_prompt() {
          Some(prompt) if pending.as_ref() != Some(prompt) => {
            if auto_allow {
              eprintln!("allowing {}: {}", prompt.name, prompt.message);
              if let Err(e) = mediator.respond(&task_id, PermissionDecision::Allow).await {
                warn!(error = %e, "permission response rejected");
              }
            } else {
              ask(prompt);
              pending = Some(prompt.clone());
            }
          }
          Some(_) => {}
          None => pending = None,
        }
      }
    }
  };

  while let Ok(sequence) = event_sequences.try_recv() {
    print_new_events(&sequence, &mut printed);
  }

  cancel.cancel();
  let _ = listener.await;

  let task = finished
    .or_else(|| registry.get_task(&task_id))
    .context("task disappeared")?;
  println!("{}", serde_json::to_string_pretty(&task.view())?);

  Ok(task.status())
}

fn host_config(config: &BridgeConfig, options: &RunOptions, data_dir: &Path) -> ProcessHostConfig {
  let host = &config.host;
  let scripts_dir = host
    .scripts_dir
    .clone()
    .unwrap_or_else(|| data_dir.join("scripts"));
  let program = options.program.clone().unwrap_or_else(|| host.program.clone());
  let args = if options.args.is_empty() {
    host.args.clone()
  } else {
    options.args.clone()
  };

  let mut host_config = ProcessHostConfig::new(program, scripts_dir)
    .with_args(args)
    .with_extension(host.script_extension.clone());
  for (key, value) in &host.env {
    host_config = host_config.with_env(key.clone(), value.clone());
  }
  host_config
}

/// Read stdin lines on a plain thread; stdin reads can't be cancelled.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
  let (sender, receiver) = mpsc::unbounded_channel();
  std::thread::spawn(move || {
    for line in io::stdin().lock().lines() {
      let Ok(line) = line else { break };
      if sender.send(line).is_err() {
        break;
      }
    }
  });
  receiver
}

async fn next_answer(answers: &mut Option<mpsc::UnboundedReceiver<String>>) -> Option<String> {
  match answers {
    Some(answers) => answers.recv().await,
    None => None,
  }
}

fn ask(prompt: &PermissionPrompt) {
  let api = prompt
    .api_name
    .as_deref()
    .map(|api| format!(" ({api})"))
    .unwrap_or_default();
  let choices = if prompt.is_unary {
    "[y]es / [n]o"
  } else {
    "[y]es / [n]o / [a]ll"
  };
  eprint!(
    "permission requested: {}{}\n  {}\nallow? {} ",
    prompt.name, api, prompt.message, choices
  );
  let _ = io::stderr().flush();
}

fn parse_answer(line: &str, is_unary: bool) -> Option<PermissionDecision> {
  match line.trim().to_ascii_lowercase().as_str() {
    "y" | "yes" => Some(PermissionDecision::Allow),
    "n" | "no" => Some(PermissionDecision::Deny),
    "a" | "all" if !is_unary => Some(PermissionDecision::AllowAll),
    other => other.parse().ok(),
  }
}

fn print_new_events(sequence: &[TaskEvent], printed: &mut usize) {
  if sequence.len() < *printed {
    *printed = 0;
  }
  for event in &sequence[*printed..] {
    eprintln!("[{}] {}", event.event_name, event.data);
  }
  *printed = sequence.len();
}
