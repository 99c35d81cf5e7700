//! # Frame Builder
//!
//! Deterministic encoding of request and response frames. Absent bodies are
//! written as a zero length prefix. Field lengths are bounded by `u32`; the
//! connection layer enforces a much smaller frame limit before anything gets
//! here.

use crate::constants::{MIN_REQUEST_SIZE, MIN_RESPONSE_SIZE};
use crate::frame::{Envelope, Response};
use bytes::{BufMut, Bytes, BytesMut};

fn put_prefixed(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32_le(data.len() as u32);
    buf.put_slice(data);
}

/// Encode an envelope as a request frame (edge side of the wire)
pub fn encode_request(envelope: &Envelope) -> Bytes {
    let body: &[u8] = envelope.body.as_deref().unwrap_or_default();
    let size = MIN_REQUEST_SIZE
        + envelope.method.len()
        + envelope.path.len()
        + envelope.headers_flat.len()
        + body.len();

    let mut buf = BytesMut::with_capacity(size);
    put_prefixed(&mut buf, &envelope.method);
    put_prefixed(&mut buf, &envelope.path);
    put_prefixed(&mut buf, &envelope.headers_flat);
    put_prefixed(&mut buf, body);
    buf.put_u64_le(envelope.trace_id);
    buf.put_u64_le(envelope.span_id);
    buf.put_u32_le(envelope.edge_hints);
    buf.freeze()
}

/// Encode a response frame
pub fn encode_response(response: &Response) -> Bytes {
    let body: &[u8] = response.body.as_deref().unwrap_or_default();
    let size = MIN_RESPONSE_SIZE + response.headers_flat.len() + body.len();

    let mut buf = BytesMut::with_capacity(size);
    buf.put_i32_le(response.status);
    put_prefixed(&mut buf, &response.headers_flat);
    put_prefixed(&mut buf, body);
    buf.put_u32_le(response.meta_flags);
    buf.freeze()
}

/// Encoded size of a response without building it
pub fn response_frame_len(response: &Response) -> usize {
    MIN_RESPONSE_SIZE + response.headers_flat.len() + response.body_len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_response_layout() {
        let resp = Response::new(200)
            .with_headers("A: b\r\n")
            .with_body("hi")
            .with_meta(0x10);
        let frame = encode_response(&resp);

        assert_eq!(&frame[0..4], &200i32.to_le_bytes());
        assert_eq!(&frame[4..8], &6u32.to_le_bytes());
        assert_eq!(&frame[8..14], b"A: b\r\n");
        assert_eq!(&frame[14..18], &2u32.to_le_bytes());
        assert_eq!(&frame[18..20], b"hi");
        assert_eq!(&frame[20..24], &0x10u32.to_le_bytes());
        assert_eq!(frame.len(), response_frame_len(&resp));
    }

    #[test]
    fn test_absent_body_encodes_as_empty() {
        let with_none = encode_response(&Response::new(204));
        let with_empty = encode_response(&Response::new(204).with_body(Bytes::new()));
        assert_eq!(with_none, with_empty);
    }

    #[test]
    fn test_negative_status_round_trips_as_i32() {
        let frame = encode_response(&Response::new(-1));
        assert_eq!(&frame[0..4], &(-1i32).to_le_bytes());
    }
}
