//! Envelope: the send-side unit carrying a letter plus routing metadata.

use bytes::BytesMut;
use crc32fast::hash as crc32;

use crate::letter::Letter;

/// CRC-32 of a service name.
#[must_use]
pub fn service_id(name: &str) -> u32 {
    crc32(name.as_bytes())
}

/// CRC-32 of a method name.
#[must_use]
pub fn method_id(name: &str) -> u32 {
    crc32(name.as_bytes())
}

/// Request id addressing a handler: `service_id XOR method_id`.
#[must_use]
pub fn request_id(service: &str, method: &str) -> u32 {
    service_id(service) ^ method_id(method)
}

/// A letter plus send-side routing metadata.
///
/// The request id rides in `header.meta`; the session id is stamped by the
/// client engine at send time and echoed by the server on the reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// The message to frame.
    pub letter: Letter,
}

impl Envelope {
    /// Build a request envelope addressed at `request_id`.
    #[must_use]
    pub fn new(request_id: u32, payload: impl Into<BytesMut>) -> Self {
        let mut letter = Letter::new(payload);
        letter.header.set_meta(request_id);
        Self { letter }
    }

    /// Build a reply envelope (no routing meta).
    #[must_use]
    pub fn reply(payload: impl Into<BytesMut>) -> Self {
        Self { letter: Letter::new(payload) }
    }

    /// Mark the envelope oneway: the client resolves immediately and the
    /// server suppresses the reply.
    #[must_use]
    pub fn oneway(mut self) -> Self {
        self.letter.header.set_oneway(true);
        self
    }

    /// Routing id carried in the header meta word.
    #[must_use]
    pub fn request_id(&self) -> u32 {
        self.letter.header.meta()
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.letter.payload_len()
    }
}
