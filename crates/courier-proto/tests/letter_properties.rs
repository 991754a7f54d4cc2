//! Property tests for the wire format.

use bytes::BytesMut;
use courier_proto::{Envelope, Letter, LetterHeader, payload_checksum};
use proptest::prelude::*;

proptest! {
    #[test]
    fn letter_round_trip(payload in prop::collection::vec(any::<u8>(), 1..4096),
                         session in any::<u16>(),
                         meta in any::<u32>(),
                         oneway in any::<bool>()) {
        let mut letter = Letter::new(BytesMut::from(&payload[..]));
        letter.header.set_session(session);
        letter.header.set_meta(meta);
        letter.header.set_oneway(oneway);

        let mut wire = Vec::new();
        letter.encode(&mut wire).expect("should encode");
        prop_assert_eq!(wire.len(), LetterHeader::SIZE + payload.len());

        let parsed = Letter::decode(&wire).expect("should decode");
        prop_assert_eq!(&parsed, &letter);
        prop_assert_eq!(parsed.header.session(), session);
        prop_assert_eq!(parsed.header.meta(), meta);
        prop_assert_eq!(parsed.header.is_oneway(), oneway);
        prop_assert_eq!(parsed.payload(), &payload[..]);
    }

    #[test]
    fn accepted_letters_have_matching_checksum(payload in prop::collection::vec(any::<u8>(), 1..2048)) {
        let mut letter = Letter::new(BytesMut::from(&payload[..]));
        let mut wire = Vec::new();
        letter.encode(&mut wire).expect("should encode");

        let parsed = Letter::decode(&wire).expect("should decode");
        prop_assert_eq!(payload_checksum(parsed.payload()), parsed.header.checksum());
    }

    #[test]
    fn double_encode_is_stable(payload in prop::collection::vec(any::<u8>(), 1..2048)) {
        let mut letter = Letter::new(BytesMut::from(&payload[..]));

        let mut first = Vec::new();
        letter.encode(&mut first).expect("should encode");
        let mut second = Vec::new();
        letter.encode(&mut second).expect("should encode");

        prop_assert_eq!(first, second);
    }

    #[test]
    fn envelope_meta_survives_the_wire(request_id in 1u32.., payload in prop::collection::vec(any::<u8>(), 1..512)) {
        let mut envelope = Envelope::new(request_id, BytesMut::from(&payload[..]));

        let mut wire = Vec::new();
        envelope.letter.encode(&mut wire).expect("should encode");

        let parsed = Letter::decode(&wire).expect("should decode");
        prop_assert_eq!(parsed.header.meta(), request_id);
    }
}
