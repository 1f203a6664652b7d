use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How the process sandbox host launches scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
  /// Interpreter executable.
  pub program: String,
  /// Arguments placed before the script path.
  pub args: Vec<String>,
  /// Extension given to the script files written before each run.
  pub script_extension: String,
  /// Where script files are written. Defaults to `<data dir>/scripts`.
  pub scripts_dir: Option<PathBuf>,
  /// Extra environment variables for every script process.
  pub env: BTreeMap<String, String>,
}

impl Default for HostConfig {
  fn default() -> Self {
    Self {
      program: "deno".to_string(),
      args: vec!["run".to_string(), "--quiet".to_string()],
      script_extension: "ts".to_string(),
      scripts_dir: None,
      env: BTreeMap::new(),
    }
  }
}
