//! Wire framing for the BM25 search daemon's stdin/stdout protocol, kept
//! separate from process management so it is unit- and fuzz-testable
//! without a real subprocess. Ported from the header-delimited framing in
//! `original_source/.../daemon_wrapper.py`'s `_read_frame`/`_encode_frame`.

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

const HEADER_PREFIX: &str = "Content-Length: ";
const HEADER_DELIM: &[u8] = b"\r\n\r\n";

/// A request sent to the daemon: an id used to match the reply, the RPC
/// name, and its string-coerced parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub id: String,
    pub call: String,
    pub params: Vec<String>,
}

/// A reply from the daemon. `status == 0` means success; the payload is
/// whichever of `result_json`/`result` is present, falling back to the
/// envelope itself.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonResponse {
    pub id: String,
    pub status: i32,
    #[serde(rename = "resultJson")]
    pub result_json: Option<String>,
    pub result: Option<serde_json::Value>,
}

/// Encode a JSON payload as `Content-Length: N\r\n\r\n<payload>`.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let header = format!("{HEADER_PREFIX}{}\r\n\r\n", payload.len());
    let mut out = Vec::with_capacity(header.len() + payload.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn encode_request(req: &DaemonRequest) -> PipelineResult<Vec<u8>> {
    let payload = serde_json::to_vec(req)?;
    Ok(encode_frame(&payload))
}

/// Attempt to decode one complete frame from the front of `buf`. Returns
/// `Ok(None)` if the buffer does not yet hold a full frame (caller should
/// read more bytes and retry); on success the consumed bytes are drained
/// from `buf`.
pub fn try_decode_frame(buf: &mut BytesMut) -> PipelineResult<Option<Vec<u8>>> {
    let header_end = match find_subslice(buf, HEADER_DELIM) {
        Some(idx) => idx,
        None => return Ok(None),
    };

    let header = std::str::from_utf8(&buf[..header_end])
        .map_err(|e| PipelineError::DaemonLost(format!("invalid frame header: {e}")))?;

    let length: usize = header
        .lines()
        .find_map(|line| line.strip_prefix(HEADER_PREFIX))
        .ok_or_else(|| PipelineError::DaemonLost("missing Content-Length header".to_string()))?
        .trim()
        .parse()
        .map_err(|e| PipelineError::DaemonLost(format!("invalid Content-Length: {e}")))?;

    let frame_start = header_end + HEADER_DELIM.len();
    let frame_end = frame_start + length;
    if buf.len() < frame_end {
        return Ok(None);
    }

    buf.advance(frame_start);
    let payload = buf.split_to(length).to_vec();
    Ok(Some(payload))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

pub fn decode_response(payload: &[u8]) -> PipelineResult<DaemonResponse> {
    serde_json::from_slice(payload).map_err(PipelineError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_request() {
        let req = DaemonRequest {
            id: "abc123".to_string(),
            call: "search".to_string(),
            params: vec!["q1".to_string(), "out.jsonl".to_string()],
        };
        let framed = encode_request(&req).unwrap();
        let mut buf = BytesMut::from(&framed[..]);
        let payload = try_decode_frame(&mut buf).unwrap().unwrap();
        let decoded: DaemonRequest = serde_json::from_slice(&payload).unwrap();
        assert_eq!(decoded.id, req.id);
        assert_eq!(decoded.call, req.call);
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_frame_returns_none() {
        let mut buf = BytesMut::from(&b"Content-Length: 10\r\n\r\n12345"[..]);
        assert!(try_decode_frame(&mut buf).unwrap().is_none());
    }

    #[test]
    fn missing_header_errors() {
        let mut buf = BytesMut::from(&b"garbage\r\n\r\n{}"[..]);
        assert!(try_decode_frame(&mut buf).is_err());
    }

    #[test]
    fn handles_multiple_frames_back_to_back() {
        let req = DaemonRequest {
            id: "x".to_string(),
            call: "selectDocuments".to_string(),
            params: vec![],
        };
        let one = encode_request(&req).unwrap();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&one);
        buf.extend_from_slice(&one);

        let first = try_decode_frame(&mut buf).unwrap().unwrap();
        assert!(!first.is_empty());
        let second = try_decode_frame(&mut buf).unwrap().unwrap();
        assert!(!second.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_response_prefers_result_json() {
        let payload = br#"{"id":"1","status":0,"resultJson":"[]","result":null}"#;
        let resp = decode_response(payload).unwrap();
        assert_eq!(resp.status, 0);
        assert_eq!(resp.result_json.as_deref(), Some("[]"));
    }
}
