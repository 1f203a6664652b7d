//! Line-delimited JSON spoken between [`ProcessHost`](crate::ProcessHost)
//! and the script process.
//!
//! The script writes one [`ScriptMessage`] per line on stdout:
//!
//! ```text
//! {"type":"event","name":"progress","data":{"progress":50}}
//! {"type":"permission","name":"write","api_name":"Deno.writeTextFile","message":"write ./out.txt"}
//! {"type":"return","value":{"x":1}}
//! {"type":"error","message":"ReferenceError: foo is not defined"}
//! ```
//!
//! Lines that aren't a recognizable message are treated as console output.
//! The host answers on stdin with one [`HostMessage`] per line.

use powblocs_task::{PermissionDecision, PermissionPrompt};
use serde::{Deserialize, Serialize};

/// A message from the script process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptMessage {
  /// Set the script's return value. The last one wins.
  Return {
    #[serde(default)]
    value: serde_json::Value,
  },
  /// A named event.
  Event {
    name: String,
    #[serde(default)]
    data: serde_json::Value,
  },
  /// The script is blocked on a permission request.
  Permission(PermissionPrompt),
  /// The script failed with an uncaught error.
  Error { message: String },
}

impl ScriptMessage {
  /// Parse one stdout line, `None` if it's plain output.
  pub fn parse(line: &str) -> Option<Self> {
    let line = line.trim();
    if !line.starts_with('{') {
      return None;
    }
    serde_json::from_str(line).ok()
  }
}

/// A message to the script process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
  /// Answer to the outstanding permission request.
  PermissionResponse { decision: PermissionDecision },
  /// Finish up and exit.
  Stop,
}

impl HostMessage {
  /// Encode as a single newline-terminated line.
  pub fn to_line(&self) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(self)?;
    bytes.push(b'\n');
    Ok(bytes)
  }
}
