use std::time::Duration;

use crate::transport::TransportError;

/// Error type returned by call handlers.
///
/// Only the rendered message chain crosses the wire; the concrete type is
/// lost on the caller's side.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A second `on_call` registration for a name that already has a handler.
    #[error("a call handler is already registered for '{name}'")]
    DuplicateHandler { name: String },

    /// The peer rejected the call. Carries the flattened remote error.
    #[error("{0}")]
    Remote(String),

    /// The peer speaks a protocol this side does not understand.
    #[error("unknown envelope: {0}")]
    UnknownEnvelope(String),

    /// The bridge was closed or dropped before the call was answered.
    #[error("bridge closed")]
    Closed,

    #[error("call '{name}' timed out after {duration:?}")]
    Timeout { name: String, duration: Duration },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BridgeError {
    pub fn is_closed(&self) -> bool {
        matches!(self, BridgeError::Closed)
    }

    /// The remote failure text, if the peer rejected the call.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            BridgeError::Remote(message) => Some(message),
            _ => None,
        }
    }
}

/// Render an error and its `source()` chain as one string.
///
/// The first line is the error's own message; every cause follows on its
/// own indented line.
pub fn flatten_error(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str("\n    caused by: ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
