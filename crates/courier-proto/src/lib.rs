//! Wire format for the Courier RPC transport.
//!
//! Every message on the wire is `[header || payload]`: a fixed 16-byte
//! little-endian [`LetterHeader`] followed by exactly `header.size()` opaque
//! payload bytes. The payload's xxhash-32 is carried in the header and
//! verified on every parse; the core never interprets payload bytes beyond
//! that.
//!
//! Handlers are addressed by a *request id*, the XOR of the CRC-32 of the
//! service name and the CRC-32 of the method name (see [`request_id`]).

mod envelope;
mod errors;
mod header;
mod letter;

pub use envelope::{Envelope, method_id, request_id, service_id};
pub use errors::ProtocolError;
pub use header::{CompressionKind, LetterHeader};
pub use letter::{Letter, LetterBody, payload_checksum};

/// Result alias for wire-format operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
