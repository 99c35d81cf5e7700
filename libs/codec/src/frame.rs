//! Request envelope and response frame types
//!
//! Text fields of the envelope are kept as raw bytes exactly as they arrived;
//! whether they are well-formed UTF-8 is decided by the dispatch workflow, not
//! by the codec. The accessors return `None` for malformed text.

use bytes::Bytes;

/// Normalized request produced by the edge gateway
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    pub method: Bytes,
    pub path: Bytes,
    /// Raw `K: V\r\n` concatenation
    pub headers_flat: Bytes,
    pub body: Option<Bytes>,
    pub trace_id: u64,
    pub span_id: u64,
    pub edge_hints: u32,
    /// Client identity, attached after accept; never on the wire
    pub remote: Option<String>,
}

impl Envelope {
    pub fn new(method: impl Into<Bytes>, path: impl Into<Bytes>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_headers(mut self, headers_flat: impl Into<Bytes>) -> Self {
        self.headers_flat = headers_flat.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_ids(mut self, trace_id: u64, span_id: u64) -> Self {
        self.trace_id = trace_id;
        self.span_id = span_id;
        self
    }

    pub fn with_hints(mut self, edge_hints: u32) -> Self {
        self.edge_hints = edge_hints;
        self
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = Some(remote.into());
        self
    }

    pub fn method_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.method).ok()
    }

    pub fn path_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.path).ok()
    }

    pub fn headers_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.headers_flat).ok()
    }

    /// Iterate `(name, value)` pairs of the flat header block.
    ///
    /// Lines without a colon are skipped; names and values are trimmed.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers_str()
            .unwrap_or_default()
            .split("\r\n")
            .filter_map(|line| {
                let (name, value) = line.split_once(':')?;
                Some((name.trim(), value.trim()))
            })
    }

    /// First header value with a case-insensitive name match
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}

/// Response frame produced once per request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response {
    pub status: i32,
    pub headers_flat: Bytes,
    pub body: Option<Bytes>,
    pub meta_flags: u32,
}

impl Response {
    pub fn new(status: i32) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_headers(mut self, headers_flat: impl Into<Bytes>) -> Self {
        self.headers_flat = headers_flat.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_meta(mut self, meta_flags: u32) -> Self {
        self.meta_flags |= meta_flags;
        self
    }

    /// Body length, zero when absent
    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, |b| b.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let env = Envelope::new("GET", "/")
            .with_headers("Host: example.org\r\nX-Forwarded-For: 10.0.0.1, 10.0.0.2\r\n");

        assert_eq!(env.header("host"), Some("example.org"));
        assert_eq!(env.header("x-forwarded-for"), Some("10.0.0.1, 10.0.0.2"));
        assert_eq!(env.header("missing"), None);
    }

    #[test]
    fn test_invalid_utf8_accessors() {
        let env = Envelope::new(vec![0xff, 0xfe], "/ok");
        assert!(env.method_str().is_none());
        assert_eq!(env.path_str(), Some("/ok"));
    }
}
