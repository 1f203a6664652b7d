//! PowBlocs Events
//!
//! Task-scoped event streams. Scripts emit named payloads (progress, log
//! lines, partial results) while they run; the [`EventStream`] keeps one
//! ordered, append-only sequence per task and hands the full sequence to the
//! task's observers on every append.
//!
//! Kept apart from the task registry: events are frequent and unbounded,
//! task records are small snapshots that change a handful of times.

mod stream;

pub use stream::EventStream;
