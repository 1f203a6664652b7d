use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::host::HostConfig;

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
  /// How long a task may stay `stopping` before it is force-killed.
  pub stop_timeout_ms: u64,
  pub host: HostConfig,
}

impl BridgeConfig {
  pub fn from_json_str(path: &Path, content: &str) -> Result<Self, ConfigError> {
    serde_json::from_str(content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Load a config file.
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json_str(path, &content)
  }

  pub fn stop_timeout(&self) -> Duration {
    Duration::from_millis(self.stop_timeout_ms)
  }
}

impl Default for BridgeConfig {
  fn default() -> Self {
    Self {
      stop_timeout_ms: 5000,
      host: HostConfig::default(),
    }
  }
}
