//! Fixed-size letter header with zero-copy parsing.
//!
//! The header is a packed 16-byte structure transmitted as-is (little-endian
//! field order). It is the only part of a message the transport interprets:
//! payload length, payload checksum, the client-chosen session id, the
//! compression kind, and the routing meta word.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::ProtocolError;

/// Payload compression kind carried in [`LetterHeader::compression`].
///
/// The transport only records the kind; the codecs themselves are supplied by
/// the application (see `courier-core`'s codec registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionKind {
    /// Payload bytes are sent as-is.
    None = 0,
    /// LZ4 block compression.
    Lz4 = 1,
    /// Zstandard compression.
    Zstd = 2,
}

impl CompressionKind {
    /// Decode from the wire byte. `None` if unrecognized.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Lz4),
            2 => Some(Self::Zstd),
            _ => None,
        }
    }

    /// Wire byte for this kind.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Fixed 16-byte message header (little-endian).
///
/// Multi-byte fields are stored as raw byte arrays to keep the struct free of
/// alignment padding; accessors convert at the call site. The layout is a
/// compile-time constant ([`LetterHeader::SIZE`]) verified by a test.
///
/// # Invariants
///
/// A header framing a valid message has `size() > 0` and `checksum() != 0`.
/// Both are checked by [`LetterHeader::validate`] on the receive path.
#[repr(C, packed)]
#[derive(Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct LetterHeader {
    compression: u8,
    bitflags: u8,
    session: [u8; 2],
    size: [u8; 4],
    checksum: [u8; 4],
    meta: [u8; 4],
}

impl LetterHeader {
    /// Size of the serialized header in bytes.
    pub const SIZE: usize = 16;

    /// Default ceiling on `size()`: 2 GiB.
    pub const DEFAULT_MAX_PAYLOAD: u32 = 2 * 1024 * 1024 * 1024;

    /// Flag bit: the sender does not await a response.
    pub const FLAG_ONEWAY: u8 = 0b0000_0001;

    /// Parse a header from the front of `bytes` without copying.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::HeaderTruncated`] if fewer than
    ///   [`LetterHeader::SIZE`] bytes are available.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self, ProtocolError> {
        Ok(Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::HeaderTruncated {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0)
    }

    /// Serialize to the wire representation.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Check the framing invariants for an inbound header.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::EmptyPayload`] if `size == 0` or `checksum == 0`
    /// - [`ProtocolError::PayloadTooLarge`] if `size > max_payload`
    /// - [`ProtocolError::UnknownCompression`] for an unrecognized kind
    pub fn validate(&self, max_payload: u32) -> Result<(), ProtocolError> {
        if self.size() == 0 || self.checksum() == 0 {
            return Err(ProtocolError::EmptyPayload);
        }
        if self.size() > max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.size() as usize,
                max: max_payload as usize,
            });
        }
        if CompressionKind::from_u8(self.compression).is_none() {
            return Err(ProtocolError::UnknownCompression(self.compression));
        }
        Ok(())
    }

    /// Payload compression kind. Defaults to [`CompressionKind::None`] for an
    /// unrecognized byte; [`LetterHeader::validate`] rejects those upstream.
    #[must_use]
    pub fn compression(&self) -> CompressionKind {
        CompressionKind::from_u8(self.compression).unwrap_or(CompressionKind::None)
    }

    /// Set the payload compression kind.
    pub fn set_compression(&mut self, kind: CompressionKind) {
        self.compression = kind.to_u8();
    }

    /// Raw flag bits.
    #[must_use]
    pub fn bitflags(&self) -> u8 {
        self.bitflags
    }

    /// The sender does not await a response to this message.
    #[must_use]
    pub fn is_oneway(&self) -> bool {
        self.bitflags & Self::FLAG_ONEWAY != 0
    }

    /// Set or clear the oneway flag.
    pub fn set_oneway(&mut self, oneway: bool) {
        if oneway {
            self.bitflags |= Self::FLAG_ONEWAY;
        } else {
            self.bitflags &= !Self::FLAG_ONEWAY;
        }
    }

    /// Per-request correlation id, chosen by the client, echoed by the server.
    #[must_use]
    pub fn session(&self) -> u16 {
        u16::from_le_bytes(self.session)
    }

    /// Stamp the session id.
    pub fn set_session(&mut self, session: u16) {
        self.session = session.to_le_bytes();
    }

    /// Payload byte length (excludes the header itself).
    #[must_use]
    pub fn size(&self) -> u32 {
        u32::from_le_bytes(self.size)
    }

    /// Set the payload byte length.
    pub fn set_size(&mut self, size: u32) {
        self.size = size.to_le_bytes();
    }

    /// xxhash-32 of the payload bytes.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        u32::from_le_bytes(self.checksum)
    }

    /// Set the payload checksum.
    pub fn set_checksum(&mut self, checksum: u32) {
        self.checksum = checksum.to_le_bytes();
    }

    /// Routing meta word: the request id on requests, zero otherwise.
    #[must_use]
    pub fn meta(&self) -> u32 {
        u32::from_le_bytes(self.meta)
    }

    /// Set the routing meta word.
    pub fn set_meta(&mut self, meta: u32) {
        self.meta = meta.to_le_bytes();
    }
}

// Manual Debug implementation (can't take references into a packed repr)
impl std::fmt::Debug for LetterHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LetterHeader")
            .field("compression", &self.compression())
            .field("oneway", &self.is_oneway())
            .field("session", &self.session())
            .field("size", &self.size())
            .field("checksum", &format_args!("{:#010x}", self.checksum()))
            .field("meta", &format_args!("{:#010x}", self.meta()))
            .finish()
    }
}

impl PartialEq for LetterHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for LetterHeader {}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    impl Arbitrary for LetterHeader {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with((): Self::Parameters) -> Self::Strategy {
            (
                0u8..=2,                                // compression
                any::<bool>(),                          // oneway
                any::<u16>(),                           // session
                1u32..=LetterHeader::DEFAULT_MAX_PAYLOAD, // size
                1u32..,                                 // checksum (nonzero)
                any::<u32>(),                           // meta
            )
                .prop_map(|(compression, oneway, session, size, checksum, meta)| {
                    let mut header = Self::default();
                    header.compression = compression;
                    header.set_oneway(oneway);
                    header.set_session(session);
                    header.set_size(size);
                    header.set_checksum(checksum);
                    header.set_meta(meta);
                    header
                })
                .boxed()
        }
    }

    #[test]
    fn header_size_is_declared_constant() {
        assert_eq!(std::mem::size_of::<LetterHeader>(), LetterHeader::SIZE);
        assert_eq!(LetterHeader::SIZE, 16);
        assert_eq!(LetterHeader::SIZE % 8, 0);
    }

    #[test]
    fn field_offsets_are_little_endian() {
        let mut header = LetterHeader::default();
        header.set_session(0x1234);
        header.set_size(0xAABB_CCDD);
        header.set_checksum(0x0102_0304);
        header.set_meta(0xCAFE_BABE);

        let bytes = header.to_bytes();
        assert_eq!(&bytes[2..4], &[0x34, 0x12]);
        assert_eq!(&bytes[4..8], &[0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(&bytes[8..12], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[12..16], &[0xBE, 0xBA, 0xFE, 0xCA]);
    }

    #[test]
    fn reject_short_buffer() {
        let short = [0u8; 7];
        let result = LetterHeader::from_bytes(&short);
        assert_eq!(
            result,
            Err(ProtocolError::HeaderTruncated { expected: 16, actual: 7 })
        );
    }

    #[test]
    fn validate_rejects_zero_size_and_checksum() {
        let mut header = LetterHeader::default();
        header.set_checksum(1);
        assert_eq!(
            header.validate(LetterHeader::DEFAULT_MAX_PAYLOAD),
            Err(ProtocolError::EmptyPayload)
        );

        header.set_size(1);
        header.set_checksum(0);
        assert_eq!(
            header.validate(LetterHeader::DEFAULT_MAX_PAYLOAD),
            Err(ProtocolError::EmptyPayload)
        );
    }

    #[test]
    fn validate_enforces_payload_ceiling() {
        let mut header = LetterHeader::default();
        header.set_size(1025);
        header.set_checksum(1);
        assert!(header.validate(1025).is_ok());
        assert!(matches!(
            header.validate(1024),
            Err(ProtocolError::PayloadTooLarge { size: 1025, max: 1024 })
        ));
    }

    #[test]
    fn validate_rejects_unknown_compression() {
        let mut header = LetterHeader::default();
        header.set_size(4);
        header.set_checksum(7);
        header.compression = 9;
        assert_eq!(
            header.validate(LetterHeader::DEFAULT_MAX_PAYLOAD),
            Err(ProtocolError::UnknownCompression(9))
        );
    }

    #[test]
    fn oneway_flag_round_trip() {
        let mut header = LetterHeader::default();
        assert!(!header.is_oneway());
        header.set_oneway(true);
        assert!(header.is_oneway());
        header.set_oneway(false);
        assert!(!header.is_oneway());
    }

    proptest! {
        #[test]
        fn header_round_trip(header in any::<LetterHeader>()) {
            let bytes = header.to_bytes();
            let parsed = LetterHeader::from_bytes(&bytes).expect("should parse");
            prop_assert_eq!(&header, parsed);
        }
    }
}
