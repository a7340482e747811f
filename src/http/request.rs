use std::borrow::Cow;
use std::collections::HashMap;

use bytes::Bytes;
use http::{Method, Version};
use serde::de::DeserializeOwned;

use super::sequence::ByteSequence;
use crate::buffer::PooledBuffer;

/// Header names with a dedicated O(1) slot in [`Headers`].
#[derive(Debug, Clone, Copy)]
enum WellKnown {
    Host,
    ContentLength,
    ContentType,
    TransferEncoding,
    Connection,
}

impl WellKnown {
    fn classify(name: &str) -> Option<Self> {
        // Cheap length pre-check before the case-insensitive compare.
        match name.len() {
            4 if name.eq_ignore_ascii_case("host") => Some(Self::Host),
            10 if name.eq_ignore_ascii_case("connection") => Some(Self::Connection),
            12 if name.eq_ignore_ascii_case("content-type") => Some(Self::ContentType),
            14 if name.eq_ignore_ascii_case("content-length") => Some(Self::ContentLength),
            17 if name.eq_ignore_ascii_case("transfer-encoding") => Some(Self::TransferEncoding),
            _ => None,
        }
    }
}

/// Ordered request headers with case-insensitive lookup.
///
/// Names keep the casing sent by the client. The first occurrence of `Host`,
/// `Content-Length`, `Content-Type`, `Transfer-Encoding` and `Connection` is
/// indexed when the header is pushed, so those lookups never scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
    host: Option<usize>,
    content_length: Option<usize>,
    content_type: Option<usize>,
    transfer_encoding: Option<usize>,
    connection: Option<usize>,
}

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(n: usize) -> Self {
        Self {
            entries: Vec::with_capacity(n),
            ..Self::default()
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let idx = self.entries.len();
        if let Some(known) = WellKnown::classify(&name) {
            let slot = match known {
                WellKnown::Host => &mut self.host,
                WellKnown::ContentLength => &mut self.content_length,
                WellKnown::ContentType => &mut self.content_type,
                WellKnown::TransferEncoding => &mut self.transfer_encoding,
                WellKnown::Connection => &mut self.connection,
            };
            slot.get_or_insert(idx);
        }
        self.entries.push((name, value.into()));
    }

    /// First value for `name`, compared case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        if let Some(known) = WellKnown::classify(name) {
            return self.known(known);
        }
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name` in arrival order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    fn known(&self, which: WellKnown) -> Option<&str> {
        let idx = match which {
            WellKnown::Host => self.host,
            WellKnown::ContentLength => self.content_length,
            WellKnown::ContentType => self.content_type,
            WellKnown::TransferEncoding => self.transfer_encoding,
            WellKnown::Connection => self.connection,
        }?;
        self.entries.get(idx).map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.known(WellKnown::Host)
    }

    /// Raw `Content-Length` value. The parser resolves the effective length.
    #[must_use]
    pub fn content_length(&self) -> Option<&str> {
        self.known(WellKnown::ContentLength)
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.known(WellKnown::ContentType)
    }

    #[must_use]
    pub fn transfer_encoding(&self) -> Option<&str> {
        self.known(WellKnown::TransferEncoding)
    }

    #[must_use]
    pub fn connection(&self) -> Option<&str> {
        self.known(WellKnown::Connection)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// Request body as produced by the parser.
///
/// `Slice` shares storage with the connection's receive buffer. `Pooled` owns
/// a buffer checked out of the [`BufferPool`](crate::buffer::BufferPool) (the
/// chunked case); dropping the body returns that buffer.
#[derive(Debug, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Slice(ByteSequence),
    Pooled(PooledBuffer),
}

impl RequestBody {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            RequestBody::Empty => 0,
            RequestBody::Slice(seq) => seq.len(),
            RequestBody::Pooled(buf) => buf.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether dropping this body releases a pooled buffer.
    #[must_use]
    pub fn owns_pooled_buffer(&self) -> bool {
        matches!(self, RequestBody::Pooled(_))
    }

    /// Contiguous view of the body. Borrowed unless the slice spans segments.
    #[must_use]
    pub fn contiguous(&self) -> Cow<'_, [u8]> {
        match self {
            RequestBody::Empty => Cow::Borrowed(&[]),
            RequestBody::Slice(seq) => match seq.segments().next() {
                Some(only) if seq.is_single_segment() => Cow::Borrowed(&only[..]),
                _ => Cow::Owned(seq.copy_to_vec()),
            },
            RequestBody::Pooled(buf) => Cow::Borrowed(buf.as_slice()),
        }
    }

    /// Body as a byte sequence (copies pooled bytes out of the pool buffer).
    #[must_use]
    pub fn to_sequence(&self) -> ByteSequence {
        match self {
            RequestBody::Empty => ByteSequence::new(),
            RequestBody::Slice(seq) => seq.clone(),
            RequestBody::Pooled(buf) => ByteSequence::from(Bytes::copy_from_slice(buf.as_slice())),
        }
    }

    /// Body as `Bytes`. Zero-copy for single-segment slices.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        match self {
            RequestBody::Empty => Bytes::new(),
            RequestBody::Slice(seq) => seq.to_contiguous(),
            RequestBody::Pooled(buf) => Bytes::copy_from_slice(buf.as_slice()),
        }
    }
}

/// One parsed HTTP request.
///
/// Immutable after the parser builds it; the body may reference the
/// connection's receive buffer.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    /// Percent-decoded path without the query.
    pub path: String,
    /// The request target exactly as received.
    pub target: String,
    pub version: Version,
    /// Raw query string (without `?`).
    pub query_string: String,
    /// Decoded query parameters; duplicate keys keep the last value.
    pub query: HashMap<String, String>,
    pub headers: Headers,
    pub body: RequestBody,
    pub keep_alive: bool,
}

impl Request {
    /// Convenience constructor used by tests and synthetic requests.
    #[must_use]
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query_string) = match target.split_once('?') {
            Some((p, q)) => (p, q),
            None => (target, ""),
        };
        Self {
            method,
            path: super::decode_path(path).into_owned(),
            target: target.to_string(),
            version: Version::HTTP_11,
            query_string: query_string.to_string(),
            query: super::parse_query(query_string),
            headers: Headers::new(),
            body: RequestBody::Empty,
            keep_alive: true,
        }
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    #[must_use]
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Cookies from the `Cookie` header(s).
    #[must_use]
    pub fn cookies(&self) -> HashMap<String, String> {
        self.headers
            .get_all("cookie")
            .flat_map(|c| c.split(';'))
            .filter_map(|pair| {
                let mut parts = pair.trim().splitn(2, '=');
                let name = parts.next()?.trim();
                if name.is_empty() {
                    return None;
                }
                let value = parts.next().unwrap_or("").trim();
                Some((name.to_string(), value.to_string()))
            })
            .collect()
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body.contiguous())
    }

    /// Whether `Connection` lists `token` (case-insensitive).
    #[must_use]
    pub fn connection_has(&self, token: &str) -> bool {
        self.headers
            .get_all("connection")
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// Whether this is an upgrade request to `protocol`.
    #[must_use]
    pub fn is_upgrade_to(&self, protocol: &str) -> bool {
        self.connection_has("upgrade")
            && self
                .headers
                .get("upgrade")
                .is_some_and(|u| u.trim().eq_ignore_ascii_case(protocol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_case_insensitive() {
        let mut h = Headers::new();
        h.push("Content-Type", "text/plain");
        h.push("X-Custom", "1");
        h.push("x-custom", "2");
        assert_eq!(h.get("content-type"), Some("text/plain"));
        assert_eq!(h.content_type(), Some("text/plain"));
        assert_eq!(h.get("X-CUSTOM"), Some("1"));
        assert_eq!(h.get_all("x-custom").collect::<Vec<_>>(), vec!["1", "2"]);
        assert_eq!(h.host(), None);
    }

    #[test]
    fn test_first_well_known_occurrence_is_indexed() {
        let mut h = Headers::new();
        h.push("Host", "a");
        h.push("host", "b");
        assert_eq!(h.host(), Some("a"));
    }

    #[test]
    fn test_cookies() {
        let mut req = Request::new(Method::GET, "/");
        req.headers.push("Cookie", "session=abc; theme=dark; bare");
        let cookies = req.cookies();
        assert_eq!(cookies["session"], "abc");
        assert_eq!(cookies["theme"], "dark");
        assert_eq!(cookies["bare"], "");
    }

    #[test]
    fn test_new_splits_query() {
        let req = Request::new(Method::GET, "/a%20b?x=1&x=2");
        assert_eq!(req.path, "/a b");
        assert_eq!(req.query_string, "x=1&x=2");
        assert_eq!(req.query("x"), Some("2"));
    }

    #[test]
    fn test_upgrade_detection() {
        let mut req = Request::new(Method::GET, "/ws");
        req.headers.push("Connection", "keep-alive, Upgrade");
        req.headers.push("Upgrade", "websocket");
        assert!(req.is_upgrade_to("WebSocket"));
        assert!(!req.is_upgrade_to("h2c"));
    }
}
