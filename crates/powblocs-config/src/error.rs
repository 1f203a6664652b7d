use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file {path}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config file {path}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}
