//! Workflow engine client seam.
//!
//! The module pipeline only needs three things from an engine: a connection,
//! a task-queue worker to attach handlers to, and a way to run that worker
//! until shutdown. Those are the [`EngineConnector`] and [`EngineClient`]
//! traits. [`LocalEngine`] is the shipped implementation: an in-process
//! task-queue dispatcher fronted by an HTTP ingress.

pub mod client;
pub mod error;
pub mod handler;
pub mod ingress;
pub mod local;
pub mod worker;

pub use client::{ConnectOptions, EngineClient, EngineConnector, Shutdown, WorkerOptions};
pub use error::{EngineError, HandlerError, Result};
pub use handler::{FnHandler, Handler, HandlerKind};
pub use local::{LocalConnector, LocalEngine};
pub use worker::{HandlerInfo, WorkerHandle};
