//! Multi-service server engine for the Courier RPC transport.
//!
//! A [`Server`] binds a TCP listener, accepts connections into per-connection
//! reader tasks, and routes parsed requests to [`Handler`]s registered
//! through [`Service`]s. Requests on one connection are pipelined: the reader
//! never blocks on handler completion, and replies are correlated by the
//! session id the client stamped. Graceful shutdown drains the reply gate so
//! no handler is interrupted mid-reply.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod admin;
mod config;
mod errors;
mod router;
mod server;
mod stats;

pub use config::{ServerArgs, ServerFlags};
pub use errors::{HandlerError, ServerError};
pub use router::{Handler, MethodHandle, Router, Service};
pub use server::Server;
pub use stats::ServerStats;
