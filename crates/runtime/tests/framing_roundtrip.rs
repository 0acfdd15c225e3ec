//! Framing round-trip coverage for spec §8 invariant 7: for any byte
//! payload, `decode(encode(payload)) == payload`.

use bytes::BytesMut;
use factcheck_runtime::daemon_protocol::{encode_frame, try_decode_frame};
use proptest::prelude::*;

proptest! {
    #[test]
    fn decode_of_encode_is_identity(payload in prop::collection::vec(any::<u8>(), 0..4096)) {
        let framed = encode_frame(&payload);
        let mut buf = BytesMut::from(&framed[..]);
        let decoded = try_decode_frame(&mut buf).unwrap().unwrap();
        prop_assert_eq!(decoded, payload);
        prop_assert!(buf.is_empty());
    }

    /// Concatenating N encoded frames back to back and decoding them one at
    /// a time recovers every payload in order, matching how the daemon's
    /// stdout reader accumulates partial TCP/pipe reads into one buffer.
    #[test]
    fn back_to_back_frames_decode_in_order(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 1..8)
    ) {
        let mut buf = BytesMut::new();
        for payload in &payloads {
            buf.extend_from_slice(&encode_frame(payload));
        }

        for expected in &payloads {
            let decoded = try_decode_frame(&mut buf).unwrap().unwrap();
            prop_assert_eq!(&decoded, expected);
        }
        prop_assert!(buf.is_empty());
    }

    /// Splitting an encoded frame across arbitrary chunk boundaries (as a
    /// real pipe read would) never yields a wrong decode: every prefix
    /// returns `None` until the full frame has arrived.
    #[test]
    fn partial_delivery_returns_none_until_complete(
        payload in prop::collection::vec(any::<u8>(), 1..96),
    ) {
        let framed = encode_frame(&payload);
        for cut in 0..framed.len() {
            let mut buf = BytesMut::from(&framed[..cut]);
            let result = try_decode_frame(&mut buf).unwrap();
            prop_assert!(result.is_none());
        }
        let mut whole = BytesMut::from(&framed[..]);
        prop_assert_eq!(try_decode_frame(&mut whole).unwrap().unwrap(), payload);
    }
}
