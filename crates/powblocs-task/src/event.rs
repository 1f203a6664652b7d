//! Events streamed out of a running task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named payload emitted by a task before its final result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
  pub task_id: String,
  /// Position of this event in the task's stream, starting at 0.
  pub sequence: u64,
  pub event_name: String,
  pub data: serde_json::Value,
  pub timestamp: DateTime<Utc>,
}
