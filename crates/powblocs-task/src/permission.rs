//! Permission prompts and the decisions that resolve them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseDecisionError;

/// A privileged operation the sandboxed script is waiting to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionPrompt {
  /// Operation category (`read`, `write`, `net`, `run`, ...).
  pub name: String,
  /// Specific API that triggered the request, when the host knows it.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub api_name: Option<String>,
  /// Human-readable description of the request.
  pub message: String,
  /// Unary prompts only offer allow/deny once; `AllowAll` is not offered.
  #[serde(default)]
  pub is_unary: bool,
}

impl PermissionPrompt {
  pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      api_name: None,
      message: message.into(),
      is_unary: false,
    }
  }

  pub fn with_api_name(mut self, api_name: impl Into<String>) -> Self {
    self.api_name = Some(api_name.into());
    self
  }

  pub fn unary(mut self) -> Self {
    self.is_unary = true;
    self
  }
}

/// A human's answer to a [`PermissionPrompt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PermissionDecision {
  Allow,
  Deny,
  /// Allow, and don't ask again for this kind of operation during this task.
  AllowAll,
}

impl PermissionDecision {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Allow => "Allow",
      Self::Deny => "Deny",
      Self::AllowAll => "AllowAll",
    }
  }

  pub fn is_allow(&self) -> bool {
    !matches!(self, Self::Deny)
  }
}

impl fmt::Display for PermissionDecision {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for PermissionDecision {
  type Err = ParseDecisionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "allow" => Ok(Self::Allow),
      "deny" => Ok(Self::Deny),
      "allowall" | "allow_all" => Ok(Self::AllowAll),
      _ => Err(ParseDecisionError(s.to_string())),
    }
  }
}

/// One resolved prompt in a task's permission history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRecord {
  pub prompt: PermissionPrompt,
  pub decision: PermissionDecision,
  pub decided_at: DateTime<Utc>,
}

impl PermissionRecord {
  pub fn new(prompt: PermissionPrompt, decision: PermissionDecision) -> Self {
    Self {
      prompt,
      decision,
      decided_at: Utc::now(),
    }
  }
}
