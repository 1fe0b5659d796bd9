//! Worker runtime: one engine connection, one task-queue worker, every
//! configured module registered on it before serving starts.

mod error;
pub mod runtime;

pub use error::RuntimeError;
pub use runtime::{RuntimeState, WorkerRuntime};
