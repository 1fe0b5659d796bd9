//! Task handlers.

use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::HandlerError;

/// What a registered handler is, from the engine's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    Workflow,
    Activity,
}

impl HandlerKind {
    /// Decode the numeric kind used across the module ABI.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(HandlerKind::Workflow),
            1 => Some(HandlerKind::Activity),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            HandlerKind::Workflow => 0,
            HandlerKind::Activity => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HandlerKind::Workflow => "workflow",
            HandlerKind::Activity => "activity",
        }
    }
}

impl std::fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work the engine can dispatch to.
///
/// Input and output are JSON; the engine owns retries and scheduling.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, input: Value) -> Result<Value, HandlerError>;
}

/// Adapts an async closure into a [`Handler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    async fn call(&self, input: Value) -> Result<Value, HandlerError> {
        (self.0)(input).await
    }
}
