//! PowBlocs Registry
//!
//! The [`TaskRegistry`] is the single source of truth for task records. Other
//! components read copies and request changes through
//! [`TaskRegistry::update_task`]; every change is republished to the task's
//! observers and to collection observers.

mod error;
mod registry;

pub use error::RegistryError;
pub use registry::TaskRegistry;
