//! Compression codec seam.
//!
//! The transport records a [`CompressionKind`] in every header and passes
//! payloads through the matching codec: the encode side compresses *before*
//! the checksum is computed, the decode side uncompresses *after* the
//! checksum is verified. The codecs themselves are external collaborators;
//! the registry ships empty and applications register what they need.

use bytes::Bytes;
use courier_proto::CompressionKind;

use crate::errors::CodecError;

/// An externally-supplied compression codec.
pub trait Codec: Send + Sync {
    /// The kind this codec implements.
    fn kind(&self) -> CompressionKind;

    /// Compress `payload` into a new buffer.
    fn compress(&self, payload: &[u8]) -> Result<Bytes, CodecError>;

    /// Uncompress `payload` into a new buffer.
    fn uncompress(&self, payload: &[u8]) -> Result<Bytes, CodecError>;
}

/// Registered codecs, looked up by kind on the decode path.
#[derive(Default)]
pub struct CodecRegistry {
    codecs: Vec<std::sync::Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a codec; a later registration for the same kind wins.
    pub fn register(&mut self, codec: std::sync::Arc<dyn Codec>) {
        self.codecs.retain(|c| c.kind() != codec.kind());
        self.codecs.push(codec);
    }

    /// Codec for `kind`, if registered. [`CompressionKind::None`] never needs
    /// one.
    #[must_use]
    pub fn get(&self, kind: CompressionKind) -> Option<&std::sync::Arc<dyn Codec>> {
        self.codecs.iter().find(|c| c.kind() == kind)
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<_> = self.codecs.iter().map(|c| c.kind()).collect();
        f.debug_struct("CodecRegistry").field("kinds", &kinds).finish()
    }
}
