//! Registry errors.

/// Errors that can occur while mutating the registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
  /// A task with this id is already registered.
  #[error("task '{task_id}' already exists")]
  AlreadyExists { task_id: String },
}
