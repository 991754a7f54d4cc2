//! Connection, admission control, and filter pipeline for the Courier RPC
//! transport.
//!
//! This crate owns the pieces both endpoints share:
//!
//! - [`Connection`]: a socket's split halves plus the per-connection error
//!   latch, enabled flag, and single-writer lock
//! - [`Limits`]: the inflight-byte semaphore that backs admission control on
//!   both reads and writes
//! - [`Gate`]: the counted barrier the server closes during graceful shutdown
//! - [`Filter`]: sequentially-composed ingress/egress transformers
//! - [`FrameReader`] / [`RecvContext`]: the receive half of the wire codec
//! - [`Codec`] / [`CodecRegistry`]: the seam to externally-supplied
//!   compression codecs
//! - [`Histogram`]: a latency recorder with a snapshot-to-disk utility

mod compression;
mod connection;
mod errors;
mod filter;
mod gate;
mod histogram;
mod limits;
mod wire;

pub use compression::{Codec, CodecRegistry};
pub use connection::{Connection, ConnectionStats};
pub use errors::{CodecError, FilterError, GateClosed, LimitsClosed};
pub use filter::{Filter, FilterChain, apply_filters};
pub use gate::{Gate, GateGuard};
pub use histogram::{Histogram, write_histogram};
pub use limits::{
    DEFAULT_BASIC_REQUEST_SIZE, DEFAULT_BLOAT_MULTIPLIER, DEFAULT_MEMORY_AVAIL,
    DEFAULT_RECV_TIMEOUT, Limits,
};
pub use wire::{FrameReader, RecvContext};
