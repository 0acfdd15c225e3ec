#![no_main]

//! Fuzz target for the search daemon's `Content-Length` frame parser and
//! its response decoder.
//!
//! Exercises `try_decode_frame` with arbitrary, possibly truncated or
//! malformed byte streams, and `decode_response` with arbitrary payload
//! bytes, to make sure neither ever panics on adversarial daemon output.

use bytes::BytesMut;
use factcheck_runtime::daemon_protocol::{decode_response, encode_frame, try_decode_frame};
use libfuzzer_sys::{arbitrary::Arbitrary, fuzz_target};

#[derive(Arbitrary, Debug)]
enum FuzzMode {
    /// Feed completely raw bytes to the frame parser.
    RawBytes(Vec<u8>),
    /// Encode a well-formed frame around arbitrary payload bytes, then
    /// truncate it at an arbitrary cut point before parsing.
    TruncatedFrame { payload: Vec<u8>, cut: u16 },
    /// Concatenate several well-formed frames and drain them one at a time.
    BackToBack(Vec<Vec<u8>>),
    /// Feed arbitrary bytes straight to the response decoder.
    RawResponse(Vec<u8>),
}

fuzz_target!(|mode: FuzzMode| {
    match mode {
        FuzzMode::RawBytes(bytes) => {
            let mut buf = BytesMut::from(&bytes[..]);
            // Must never panic regardless of how garbled the header/body is.
            let _ = try_decode_frame(&mut buf);
        }

        FuzzMode::TruncatedFrame { payload, cut } => {
            let framed = encode_frame(&payload);
            let cut = (cut as usize).min(framed.len());
            let mut buf = BytesMut::from(&framed[..cut]);
            let _ = try_decode_frame(&mut buf);
        }

        FuzzMode::BackToBack(payloads) => {
            let mut buf = BytesMut::new();
            for payload in payloads.iter().take(64) {
                buf.extend_from_slice(&encode_frame(payload));
            }
            loop {
                match try_decode_frame(&mut buf) {
                    Ok(Some(_)) => continue,
                    Ok(None) => break,
                    Err(_) => break,
                }
            }
        }

        FuzzMode::RawResponse(bytes) => {
            let _ = decode_response(&bytes);
        }
    }
});
