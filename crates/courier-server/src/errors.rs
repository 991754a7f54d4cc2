//! Server error types.

use thiserror::Error;

/// Errors surfaced by [`Server`](crate::Server) configuration and lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid configuration (bad bind address, etc.). Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Two registered methods hash to the same request id. Fatal at startup.
    #[error("duplicate request id {request_id:#010x} registering `{service}.{method}`")]
    DuplicateRoute {
        /// The colliding request id.
        request_id: u32,
        /// Service being registered.
        service: String,
        /// Method being registered.
        method: String,
    },

    /// `start` was called on a server that is already running.
    #[error("server already started")]
    AlreadyStarted,

    /// Socket-level failure binding or accepting.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// A dispatched handler failed.
///
/// The connection is disabled and its output stream closed; no per-request
/// error response is synthesized on the wire.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("handler failure: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Build a handler failure with the given reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}
