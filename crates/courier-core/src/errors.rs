//! Shared error types for the transport core.

use thiserror::Error;

/// A filter rejected the message, aborting the chain.
///
/// On egress this surfaces as a connection-level error; on ingress as a
/// request-level error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("filter rejected message: {0}")]
pub struct FilterError(pub String);

impl FilterError {
    /// Build a rejection with the given reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// The reply gate has begun closing; no new work is admitted.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("gate closed")]
pub struct GateClosed;

/// The connection's byte budget was torn down while a reservation waited.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("connection limits closed")]
pub struct LimitsClosed;

/// A compression codec failed to transform a payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("codec failure: {0}")]
pub struct CodecError(pub String);

impl CodecError {
    /// Build a codec failure with the given reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}
