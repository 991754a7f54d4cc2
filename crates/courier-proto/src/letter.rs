//! Letter: a header/payload pair before and after wire serialization.
//!
//! A letter starts *structured* (builder-populated bytes, checksum not yet
//! computed) and transitions to *binary* exactly once, when [`Letter::seal`]
//! computes the checksum and freezes the body. Encoding a sealed letter is a
//! plain memory copy, so serializing twice yields byte-identical buffers.

use bytes::{BufMut, Bytes, BytesMut};
use xxhash_rust::xxh32::xxh32;

use crate::{
    errors::ProtocolError,
    header::LetterHeader,
};

/// xxhash-32 of a payload, as carried in [`LetterHeader::checksum`].
#[must_use]
pub fn payload_checksum(payload: &[u8]) -> u32 {
    xxh32(payload, 0)
}

/// Body of a [`Letter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LetterBody {
    /// Builder-populated bytes; checksummed when the letter is sealed.
    Structured(BytesMut),
    /// Pre-framed bytes, produced by [`Letter::seal`] or by the wire reader.
    Binary(Bytes),
}

/// A `{header, payload}` pair prior to or after wire serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Letter {
    /// Wire header; `size` and `checksum` are patched on seal.
    pub header: LetterHeader,
    /// Payload bytes.
    pub body: LetterBody,
}

impl Letter {
    /// Create a structured letter over the given payload bytes.
    #[must_use]
    pub fn new(payload: impl Into<BytesMut>) -> Self {
        Self { header: LetterHeader::default(), body: LetterBody::Structured(payload.into()) }
    }

    /// Create an already-binary letter (filter or wire-reader use).
    ///
    /// The caller asserts that `header.size` and `header.checksum` describe
    /// `payload`; [`Letter::decode`] is the checked constructor.
    #[must_use]
    pub fn from_binary(header: LetterHeader, payload: Bytes) -> Self {
        Self { header, body: LetterBody::Binary(payload) }
    }

    /// Payload bytes regardless of body state.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        match &self.body {
            LetterBody::Structured(buf) => buf,
            LetterBody::Binary(bytes) => bytes,
        }
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.payload().len()
    }

    /// Total bytes this letter occupies on the wire.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        LetterHeader::SIZE + self.payload_len()
    }

    /// Append bytes to a structured body.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::AlreadySealed`] if the letter is already binary.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        match &mut self.body {
            LetterBody::Structured(buf) => {
                buf.extend_from_slice(bytes);
                Ok(())
            },
            LetterBody::Binary(_) => Err(ProtocolError::AlreadySealed),
        }
    }

    /// Replace the payload in place (compression filters use this).
    ///
    /// Resets the body to structured so the checksum is recomputed on seal.
    pub fn replace_payload(&mut self, payload: impl Into<BytesMut>) {
        self.body = LetterBody::Structured(payload.into());
    }

    /// Transition structured → binary: patch `header.size`, compute the
    /// payload checksum, freeze the body. Idempotent once sealed.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::EmptyPayload`] if the payload is empty; every valid
    ///   framed message has `size > 0`.
    pub fn seal(&mut self) -> Result<(), ProtocolError> {
        let buf = match &mut self.body {
            LetterBody::Binary(_) => return Ok(()),
            LetterBody::Structured(buf) => std::mem::take(buf),
        };
        if buf.is_empty() {
            return Err(ProtocolError::EmptyPayload);
        }

        // INVARIANT: payload length fits in u32 (bounded by the 2 GiB wire
        // ceiling long before it approaches u32::MAX).
        self.header.set_size(buf.len() as u32);
        self.header.set_checksum(payload_checksum(&buf));
        self.body = LetterBody::Binary(buf.freeze());
        Ok(())
    }

    /// Seal and write `[header || payload]` into `dst`.
    ///
    /// Flushing is left to the caller.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::EmptyPayload`] from [`Letter::seal`].
    pub fn encode(&mut self, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
        self.seal()?;
        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(self.payload());
        Ok(())
    }

    /// Parse `[header || payload]` back into a binary letter, verifying the
    /// size and checksum invariants.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::HeaderTruncated`] if `bytes` is shorter than a header
    /// - [`ProtocolError::PayloadTruncated`] if fewer than `header.size` bytes follow
    /// - [`ProtocolError::EmptyPayload`] / [`ProtocolError::PayloadTooLarge`] /
    ///   [`ProtocolError::UnknownCompression`] from header validation
    /// - [`ProtocolError::ChecksumMismatch`] if the payload hash disagrees
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let header = *LetterHeader::from_bytes(bytes)?;
        header.validate(LetterHeader::DEFAULT_MAX_PAYLOAD)?;

        let size = header.size() as usize;
        let end = LetterHeader::SIZE + size;
        let payload = bytes
            .get(LetterHeader::SIZE..end)
            .ok_or(ProtocolError::PayloadTruncated {
                expected: size,
                actual: bytes.len().saturating_sub(LetterHeader::SIZE),
            })?;

        let actual = payload_checksum(payload);
        if actual != header.checksum() {
            return Err(ProtocolError::ChecksumMismatch {
                expected: header.checksum(),
                actual,
            });
        }

        Ok(Self::from_binary(header, Bytes::copy_from_slice(payload)))
    }
}
