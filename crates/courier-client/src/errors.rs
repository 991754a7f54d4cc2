//! Client error types.

use courier_core::FilterError;
use thiserror::Error;

/// Errors surfaced by [`Client`](crate::Client) operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// `send` was called before `connect`.
    #[error("client is not connected")]
    NotConnected,

    /// `connect` was called more than once.
    #[error("client already connected to `{0}`")]
    AlreadyConnected(String),

    /// The connection has a latched error; no further sends are admitted.
    #[error("connection is in error state: {0}")]
    ErrorState(String),

    /// All 65536 session ids are occupied by in-flight requests.
    #[error("too many requests in flight")]
    TooManyInflight,

    /// The connection went away before the response arrived; carries the
    /// connection's error string (or a generic close reason).
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The configured server address did not parse.
    #[error("invalid server address `{addr}`: {reason}")]
    InvalidAddress {
        /// The configured address.
        addr: String,
        /// Parse failure detail.
        reason: String,
    },

    /// A filter aborted the chain.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// Socket-level failure.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}
