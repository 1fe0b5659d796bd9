//! Error types for handlers and registration.

use std::fmt;

/// Result type for handler functions.
pub type HandlerResult<T = serde_json::Value> = Result<T, HandlerError>;

/// Error a handler returns. Crosses the host boundary as
/// `{"error": "<display text>"}`.
#[derive(Debug)]
pub enum HandlerError {
    /// A user-facing error message.
    Message(String),
    /// Input or output did not (de)serialize.
    Json(serde_json::Error),
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Message(msg) => write!(f, "{msg}"),
            HandlerError::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        HandlerError::Message(msg)
    }
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        HandlerError::Message(msg.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::Json(e)
    }
}

/// The host refused a `register_handler` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    /// The registration handle is not the one passed to `modhost_register`.
    BadHandle,
    /// The name was empty or not valid UTF-8 in guest memory.
    BadName,
    /// The handler kind code is unknown to the host.
    BadKind,
    /// A code this SDK version does not know.
    Other(i32),
}

impl RegisterError {
    pub(crate) fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => None,
            -1 => Some(RegisterError::BadHandle),
            -2 => Some(RegisterError::BadName),
            -3 => Some(RegisterError::BadKind),
            other => Some(RegisterError::Other(other)),
        }
    }
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterError::BadHandle => write!(f, "unknown registration handle"),
            RegisterError::BadName => write!(f, "invalid handler name"),
            RegisterError::BadKind => write!(f, "unknown handler kind"),
            RegisterError::Other(code) => write!(f, "host rejected registration (code {code})"),
        }
    }
}

impl std::error::Error for RegisterError {}
