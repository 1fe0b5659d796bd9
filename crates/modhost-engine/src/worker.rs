//! The task-queue worker handle modules register against.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

use crate::{EngineError, Handler, HandlerKind, Result};

static NEXT_WORKER_ID: AtomicU32 = AtomicU32::new(1);

struct Registered {
    kind: HandlerKind,
    module: Option<String>,
    handler: Arc<dyn Handler>,
}

struct WorkerInner {
    id: u32,
    task_queue: String,
    identity: String,
    handlers: RwLock<HashMap<String, Registered>>,
}

/// Shared, cloneable handle to one task-queue worker.
///
/// Every module registration runs against the same handle concurrently;
/// the handler table is guarded internally so callers need no extra locking.
#[derive(Clone)]
pub struct WorkerHandle {
    inner: Arc<WorkerInner>,
}

/// Listing entry for a registered handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerInfo {
    pub name: String,
    pub kind: HandlerKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

impl WorkerHandle {
    pub fn new(task_queue: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                id: NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed),
                task_queue: task_queue.into(),
                identity: identity.into(),
                handlers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Process-unique id, passed to modules as their opaque handle.
    pub fn id(&self) -> u32 {
        self.inner.id
    }

    pub fn task_queue(&self) -> &str {
        &self.inner.task_queue
    }

    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    /// Attach a handler. Names are unique per worker.
    pub fn register(
        &self,
        name: impl Into<String>,
        kind: HandlerKind,
        module: Option<&str>,
        handler: Arc<dyn Handler>,
    ) -> Result<()> {
        let name = name.into();
        let mut handlers = self.inner.handlers.write();
        if handlers.contains_key(&name) {
            return Err(EngineError::DuplicateHandler {
                name,
                task_queue: self.inner.task_queue.clone(),
            });
        }
        tracing::debug!(
            task_queue = %self.inner.task_queue,
            handler = %name,
            kind = %kind,
            module = module.unwrap_or("-"),
            "Registered handler"
        );
        handlers.insert(
            name,
            Registered {
                kind,
                module: module.map(str::to_string),
                handler,
            },
        );
        Ok(())
    }

    /// Attach a module's handlers all at once. If any name is taken, or
    /// repeated within `entries`, nothing is registered.
    pub fn register_all(
        &self,
        module: Option<&str>,
        entries: Vec<(String, HandlerKind, Arc<dyn Handler>)>,
    ) -> Result<()> {
        let mut handlers = self.inner.handlers.write();
        {
            let mut seen = std::collections::HashSet::new();
            for (name, _, _) in &entries {
                if handlers.contains_key(name) || !seen.insert(name.as_str()) {
                    return Err(EngineError::DuplicateHandler {
                        name: name.clone(),
                        task_queue: self.inner.task_queue.clone(),
                    });
                }
            }
        }
        for (name, kind, handler) in entries {
            tracing::debug!(
                task_queue = %self.inner.task_queue,
                handler = %name,
                kind = %kind,
                module = module.unwrap_or("-"),
                "Registered handler"
            );
            handlers.insert(
                name,
                Registered {
                    kind,
                    module: module.map(str::to_string),
                    handler,
                },
            );
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.handlers.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered handlers, sorted by name.
    pub fn handlers(&self) -> Vec<HandlerInfo> {
        let mut list: Vec<HandlerInfo> = self
            .inner
            .handlers
            .read()
            .iter()
            .map(|(name, r)| HandlerInfo {
                name: name.clone(),
                kind: r.kind,
                module: r.module.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Run the named handler with `input`.
    pub async fn dispatch(&self, name: &str, input: Value) -> Result<Value> {
        // Clone the Arc out so the lock is not held across the await.
        let handler = self
            .inner
            .handlers
            .read()
            .get(name)
            .map(|r| Arc::clone(&r.handler))
            .ok_or_else(|| EngineError::UnknownHandler {
                name: name.to_string(),
                task_queue: self.inner.task_queue.clone(),
            })?;

        handler
            .call(input)
            .await
            .map_err(|source| EngineError::Handler {
                name: name.to_string(),
                source,
            })
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.inner.id)
            .field("task_queue", &self.inner.task_queue)
            .field("identity", &self.inner.identity)
            .field("handlers", &self.len())
            .finish()
    }
}
