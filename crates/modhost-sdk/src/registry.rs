//! Handler registration and dispatch inside the module.

use std::cell::RefCell;
use std::collections::HashMap;

use serde_json::{Value, json};

use crate::error::{HandlerResult, RegisterError};
use crate::host;

/// Signature of a workflow or activity implementation.
pub type HandlerFn = fn(Value) -> HandlerResult;

/// Which side of the engine a handler serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Workflow,
    Activity,
}

impl Kind {
    pub fn code(self) -> i32 {
        match self {
            Kind::Workflow => 0,
            Kind::Activity => 1,
        }
    }
}

thread_local! {
    static HANDLERS: RefCell<HashMap<String, HandlerFn>> = RefCell::new(HashMap::new());
}

/// Passed to the module's registration function. Each call announces a
/// handler to the host and keeps the function for later invocations.
#[derive(Debug)]
pub struct Registrar {
    handle: i32,
}

impl Registrar {
    #[doc(hidden)]
    pub fn new(handle: i32) -> Self {
        Self { handle }
    }

    pub fn workflow(&mut self, name: &str, f: HandlerFn) -> Result<(), RegisterError> {
        self.register(Kind::Workflow, name, f)
    }

    pub fn activity(&mut self, name: &str, f: HandlerFn) -> Result<(), RegisterError> {
        self.register(Kind::Activity, name, f)
    }

    pub fn register(&mut self, kind: Kind, name: &str, f: HandlerFn) -> Result<(), RegisterError> {
        if let Some(err) = RegisterError::from_code(host::register(self.handle, kind.code(), name)) {
            return Err(err);
        }
        HANDLERS.with(|h| h.borrow_mut().insert(name.to_string(), f));
        Ok(())
    }
}

/// Run the handler registered as `name` on raw JSON input and return the
/// response envelope bytes.
pub fn dispatch(name: &str, input: &[u8]) -> Vec<u8> {
    let envelope = match HANDLERS.with(|h| h.borrow().get(name).copied()) {
        None => json!({ "error": format!("no handler named '{name}'") }),
        Some(f) => match serde_json::from_slice::<Value>(input) {
            Err(e) => json!({ "error": format!("invalid input: {e}") }),
            Ok(input) => match f(input) {
                Ok(value) => json!({ "ok": value }),
                Err(e) => json!({ "error": e.to_string() }),
            },
        },
    };
    envelope.to_string().into_bytes()
}
