//! Response values and their HTTP/1.x serialisation.

use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use http::{StatusCode, Version};
use serde_json::Value;
use smallvec::SmallVec;

/// Maximum inline headers before heap allocation
pub const MAX_INLINE_HEADERS: usize = 16;

/// Response header storage.
///
/// Header names use `Arc<str>` so repeated names (`content-type`,
/// `cache-control`, ...) clone in O(1).
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Iterator yielding body pieces for streamed responses.
pub type BodyStream = Box<dyn Iterator<Item = io::Result<Bytes>> + Send>;

/// Response payload.
#[derive(Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    Bytes(Bytes),
    /// Written with chunked framing on HTTP/1.1, close-delimited on HTTP/1.0.
    Stream(BodyStream),
    /// Streamed straight from an open file of known length.
    File { file: File, len: u64 },
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Empty => f.write_str("Empty"),
            ResponseBody::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            ResponseBody::Stream(_) => f.write_str("Stream"),
            ResponseBody::File { len, .. } => f.debug_struct("File").field("len", len).finish(),
        }
    }
}

impl ResponseBody {
    /// Body bytes when they are held in memory.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            ResponseBody::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// A response produced by a handler or middleware.
#[derive(Debug)]
pub struct HandlerResponse {
    /// HTTP status code (200, 404, 500, etc.)
    pub status: u16,
    pub headers: HeaderVec,
    pub body: ResponseBody,
}

impl HandlerResponse {
    /// Response with a status and no body.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderVec::new(),
            body: ResponseBody::Empty,
        }
    }

    /// In-memory body with an explicit content type.
    #[must_use]
    pub fn bytes(status: u16, content_type: &str, body: impl Into<Bytes>) -> Self {
        let mut res = Self::new(status);
        res.headers
            .push((Arc::from("content-type"), content_type.to_string()));
        res.body = ResponseBody::Bytes(body.into());
        res
    }

    /// JSON response serialised with `serde_json`.
    #[must_use]
    pub fn json(status: u16, body: &Value) -> Self {
        let encoded = serde_json::to_vec(body).unwrap_or_else(|_| b"null".to_vec());
        Self::bytes(status, "application/json", encoded)
    }

    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::bytes(status, "text/plain; charset=utf-8", body.into())
    }

    #[must_use]
    pub fn html(status: u16, body: impl Into<String>) -> Self {
        Self::bytes(status, "text/html; charset=utf-8", body.into())
    }

    /// Create an error response: `{"error": message}`.
    #[must_use]
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, &serde_json::json!({ "error": message }))
    }

    #[must_use]
    pub fn not_modified() -> Self {
        Self::new(304)
    }

    /// `302 Found` pointing at `location`.
    #[must_use]
    pub fn redirect(location: &str) -> Self {
        Self::new(302).with_header("location", location)
    }

    #[must_use]
    pub fn stream(status: u16, content_type: &str, stream: BodyStream) -> Self {
        let mut res = Self::new(status);
        res.headers
            .push((Arc::from("content-type"), content_type.to_string()));
        res.body = ResponseBody::Stream(stream);
        res
    }

    /// Builder-style [`set_header`](Self::set_header).
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value.into());
        self
    }

    /// Get a header by name
    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Add or replace a header.
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value));
    }

    /// Append a header, keeping existing values with the same name.
    pub fn append_header(&mut self, name: &str, value: String) {
        self.headers.push((Arc::from(name), value));
    }

    /// Body bytes if held in memory (empty slice otherwise).
    #[must_use]
    pub fn body_bytes(&self) -> &[u8] {
        self.body.as_bytes().map_or(&[], |b| &b[..])
    }
}

/// Canonical reason phrase for `status`.
#[must_use]
pub fn status_reason(status: u16) -> &'static str {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown")
}

fn body_forbidden(status: u16) -> bool {
    (100..200).contains(&status) || status == 204 || status == 304
}

/// Serialise `response` onto `writer`.
///
/// Framing headers are computed here: any `content-length` or
/// `transfer-encoding` set by the handler is replaced. A `Date` header is
/// added unless present. Returns whether the connection may be kept open,
/// which is false when `keep_alive` is false, when the handler asked for
/// `Connection: close`, or when a stream had to be close-delimited.
///
/// # Errors
///
/// Propagates I/O errors from the writer, the body stream or the file.
pub fn write_response<W: Write + ?Sized>(
    writer: &mut W,
    response: HandlerResponse,
    version: Version,
    keep_alive: bool,
    head_request: bool,
) -> io::Result<bool> {
    let HandlerResponse {
        status,
        headers,
        body,
    } = response;
    let http10 = version == Version::HTTP_10;
    let mut keep_alive = keep_alive
        && !headers.iter().any(|(k, v)| {
            k.eq_ignore_ascii_case("connection") && v.eq_ignore_ascii_case("close")
        });

    let mut head = Vec::with_capacity(256);
    let proto = if http10 { "HTTP/1.0" } else { "HTTP/1.1" };
    write!(head, "{proto} {status} {}\r\n", status_reason(status))?;

    // A protocol switch keeps the handler's `Connection: Upgrade`.
    let switching = status == 101;
    let mut has_date = false;
    for (name, value) in &headers {
        if name.eq_ignore_ascii_case("content-length")
            || name.eq_ignore_ascii_case("transfer-encoding")
            || (name.eq_ignore_ascii_case("connection") && !switching)
        {
            continue;
        }
        has_date |= name.eq_ignore_ascii_case("date");
        write!(head, "{name}: {value}\r\n")?;
    }
    if !has_date {
        write!(head, "date: {}\r\n", httpdate::fmt_http_date(SystemTime::now()))?;
    }

    let no_body = body_forbidden(status);
    let chunked = matches!(body, ResponseBody::Stream(_)) && !no_body && !http10;
    if matches!(body, ResponseBody::Stream(_)) && !no_body && http10 {
        keep_alive = false;
    }

    if !no_body {
        match &body {
            ResponseBody::Empty => head.extend_from_slice(b"content-length: 0\r\n"),
            ResponseBody::Bytes(b) => write!(head, "content-length: {}\r\n", b.len())?,
            ResponseBody::File { len, .. } => write!(head, "content-length: {len}\r\n")?,
            ResponseBody::Stream(_) if chunked => {
                head.extend_from_slice(b"transfer-encoding: chunked\r\n");
            }
            ResponseBody::Stream(_) => {}
        }
    }

    match (keep_alive, http10) {
        _ if switching => {}
        (true, true) => head.extend_from_slice(b"connection: keep-alive\r\n"),
        (true, false) => {}
        (false, _) => head.extend_from_slice(b"connection: close\r\n"),
    }
    head.extend_from_slice(b"\r\n");

    if no_body || head_request {
        writer.write_all(&head)?;
        writer.flush()?;
        return Ok(keep_alive);
    }

    match body {
        ResponseBody::Empty => writer.write_all(&head)?,
        ResponseBody::Bytes(b) => {
            head.extend_from_slice(&b);
            writer.write_all(&head)?;
        }
        ResponseBody::File { mut file, len } => {
            writer.write_all(&head)?;
            let copied = io::copy(&mut io::Read::take(&mut file, len), writer)?;
            if copied < len {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "file shorter than announced length",
                ));
            }
        }
        ResponseBody::Stream(stream) => {
            writer.write_all(&head)?;
            writer.flush()?;
            for piece in stream {
                let piece = piece?;
                if piece.is_empty() {
                    continue;
                }
                if chunked {
                    write!(writer, "{:x}\r\n", piece.len())?;
                    writer.write_all(&piece)?;
                    writer.write_all(b"\r\n")?;
                } else {
                    writer.write_all(&piece)?;
                }
                writer.flush()?;
            }
            if chunked {
                writer.write_all(b"0\r\n\r\n")?;
            }
        }
    }
    writer.flush()?;
    Ok(keep_alive)
}
