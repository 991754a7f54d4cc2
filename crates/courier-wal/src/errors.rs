//! WAL error types.

use thiserror::Error;

/// Errors produced by the page cache and record reader.
#[derive(Debug, Error)]
pub enum WalError {
    /// The request spans more pages than the file holds.
    #[error("read out of range: offset {offset} size {size} exceeds file size {file_size}")]
    OutOfRange {
        /// Requested byte offset.
        offset: u64,
        /// Requested byte count.
        size: u64,
        /// Current file size.
        file_size: u64,
    },

    /// A record header failed the framing invariants
    /// (`checksum != 0`, `size != 0`, `size <= file_size`).
    #[error("corrupt record header at offset {offset}")]
    CorruptRecord {
        /// Offset of the offending header.
        offset: u64,
    },

    /// A record payload hashed differently than its header claims.
    #[error("record checksum mismatch at offset {offset}: header {expected:#010x}, payload {actual:#010x}")]
    ChecksumMismatch {
        /// Offset of the record header.
        offset: u64,
        /// Checksum carried in the header.
        expected: u32,
        /// Checksum computed over the payload.
        actual: u32,
    },

    /// A cached page held fewer bytes than the copy required.
    #[error("short page {page}: have {have} bytes, need {need}")]
    ShortPage {
        /// Page index.
        page: u64,
        /// Bytes resident for the page.
        have: u64,
        /// Bytes the copy needed.
        need: u64,
    },

    /// Underlying file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
