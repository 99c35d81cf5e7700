//! # Frame Parser
//!
//! Bounds-checked decoding of the little-endian request and response frames.
//! Every read checks the remaining buffer first, so a malformed frame yields a
//! [`ProtocolError`] and never a panic or a partially built value.
//!
//! ```text
//! request:  u32 len ‖ method ‖ u32 len ‖ path ‖ u32 len ‖ headers ‖ u32 len ‖ body
//!           ‖ u64 trace_id ‖ u64 span_id ‖ u32 edge_hints
//! response: i32 status ‖ u32 len ‖ headers ‖ u32 len ‖ body ‖ u32 meta_flags
//! ```

use crate::constants::LEN_PREFIX_SIZE;
use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::{Envelope, Response};
use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;

/// Cursor over a frame buffer
struct FrameReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> FrameReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn take(&mut self, n: usize, context: &'static str) -> ProtocolResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(ProtocolError::message_too_small(
                n,
                self.remaining(),
                self.offset,
                context,
            ));
        }
        let slice = &self.buf[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    fn read_u32(&mut self, context: &'static str) -> ProtocolResult<u32> {
        self.take(4, context).map(LittleEndian::read_u32)
    }

    fn read_i32(&mut self, context: &'static str) -> ProtocolResult<i32> {
        self.take(4, context).map(LittleEndian::read_i32)
    }

    fn read_u64(&mut self, context: &'static str) -> ProtocolResult<u64> {
        self.take(8, context).map(LittleEndian::read_u64)
    }

    /// Length-prefixed field; the prefix is validated against what is left
    fn read_prefixed(&mut self, field: &'static str) -> ProtocolResult<&'a [u8]> {
        let prefix_offset = self.offset;
        let declared = self.read_u32(field)? as usize;
        if declared > self.remaining() {
            return Err(ProtocolError::length_overrun(
                field,
                prefix_offset,
                declared,
                self.remaining(),
            ));
        }
        self.take(declared, field)
    }

    fn finish(&self) -> ProtocolResult<()> {
        if self.remaining() != 0 {
            return Err(ProtocolError::TrailingBytes {
                offset: self.offset,
                extra: self.remaining(),
            });
        }
        Ok(())
    }
}

fn optional_body(raw: &[u8]) -> Option<Bytes> {
    if raw.is_empty() {
        None
    } else {
        Some(Bytes::copy_from_slice(raw))
    }
}

/// Decode a request frame into an [`Envelope`].
///
/// The returned envelope has no `remote`; the connection handler attaches it.
pub fn decode_request(data: &[u8]) -> ProtocolResult<Envelope> {
    if data.len() < LEN_PREFIX_SIZE {
        return Err(ProtocolError::message_too_small(
            LEN_PREFIX_SIZE,
            data.len(),
            0,
            "request frame",
        ));
    }

    let mut reader = FrameReader::new(data);
    let method = reader.read_prefixed("method")?;
    let path = reader.read_prefixed("path")?;
    let headers = reader.read_prefixed("headers")?;
    let body = reader.read_prefixed("body")?;
    let trace_id = reader.read_u64("trace_id")?;
    let span_id = reader.read_u64("span_id")?;
    let edge_hints = reader.read_u32("edge_hints")?;
    reader.finish()?;

    Ok(Envelope {
        method: Bytes::copy_from_slice(method),
        path: Bytes::copy_from_slice(path),
        headers_flat: Bytes::copy_from_slice(headers),
        body: optional_body(body),
        trace_id,
        span_id,
        edge_hints,
        remote: None,
    })
}

/// Decode a response frame
pub fn decode_response(data: &[u8]) -> ProtocolResult<Response> {
    let mut reader = FrameReader::new(data);
    let status = reader.read_i32("status")?;
    let headers = reader.read_prefixed("headers")?;
    let body = reader.read_prefixed("body")?;
    let meta_flags = reader.read_u32("meta_flags")?;
    reader.finish()?;

    Ok(Response {
        status,
        headers_flat: Bytes::copy_from_slice(headers),
        body: optional_body(body),
        meta_flags,
    })
}
