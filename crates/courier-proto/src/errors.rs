//! Wire-format error types.

use thiserror::Error;

/// Errors produced while framing or parsing messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer bytes than a full header were available.
    #[error("header truncated: expected {expected} bytes, got {actual}")]
    HeaderTruncated {
        /// Bytes a full header requires.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// Fewer payload bytes than the header declared.
    #[error("payload truncated: expected {expected} bytes, got {actual}")]
    PayloadTruncated {
        /// Bytes the header declared.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// A valid framed message has `size > 0` and `checksum != 0`.
    #[error("empty payload: size and checksum must be nonzero")]
    EmptyPayload,

    /// Declared payload size exceeds the configured ceiling.
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Declared payload size.
        size: usize,
        /// Configured ceiling.
        max: usize,
    },

    /// Payload hash disagrees with the header checksum.
    #[error("checksum mismatch: header {expected:#010x}, payload {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum carried in the header.
        expected: u32,
        /// Checksum computed over the payload.
        actual: u32,
    },

    /// Unrecognized compression kind byte.
    #[error("unknown compression kind {0}")]
    UnknownCompression(u8),

    /// Mutating a letter that already transitioned to binary.
    #[error("letter already sealed to binary")]
    AlreadySealed,
}
