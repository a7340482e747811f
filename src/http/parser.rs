//! Incremental HTTP/1.1 request parser.
//!
//! The parser holds no per-connection state. Each call to
//! [`RequestParser::try_parse`] looks at everything received so far and either
//! reports that more bytes are needed, returns one complete request together
//! with the number of bytes it spans, or fails with a [`ParseError`].
//!
//! Content-Length bodies are sliced out of the receive sequence without
//! copying. Chunked bodies are decoded into a pooled buffer; when the message
//! is still incomplete that buffer is dropped (and so returned to the pool)
//! before `Incomplete` is reported.

use std::sync::Arc;

use http::{Method, Version};
use tracing::debug;

use super::error::{ParseError, ParseErrorKind};
use super::request::{Headers, Request, RequestBody};
use super::sequence::ByteSequence;
use super::{decode_path, parse_query};
use crate::buffer::{BufferPool, PooledBuffer};

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Longest chunk-size line (size plus extensions) accepted before giving up.
const MAX_CHUNK_LINE: usize = 4096;

pub const DEFAULT_MAX_HEADER_SIZE: usize = 16 * 1024;
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_MAX_HEADERS: usize = 100;

/// Size limits enforced while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserLimits {
    /// Upper bound for the request line plus headers, terminator included.
    pub max_header_size: usize,
    /// Upper bound for a decoded body.
    pub max_body_size: usize,
    /// Upper bound for the number of header lines.
    pub max_headers: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_headers: DEFAULT_MAX_HEADERS,
        }
    }
}

/// Outcome of a parse attempt that did not fail.
#[derive(Debug)]
pub enum ParseStatus {
    /// The sequence does not hold a full request yet.
    Incomplete,
    /// One request was parsed; `consumed` bytes belong to it.
    Complete { request: Request, consumed: usize },
}

impl ParseStatus {
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ParseStatus::Incomplete)
    }
}

enum Framing {
    None,
    Length(usize),
    Chunked,
}

/// Stateless request parser shared by every connection of a server.
#[derive(Debug, Clone)]
pub struct RequestParser {
    limits: ParserLimits,
    pool: Arc<BufferPool>,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new(ParserLimits::default(), Arc::new(BufferPool::default()))
    }
}

impl RequestParser {
    #[must_use]
    pub fn new(limits: ParserLimits, pool: Arc<BufferPool>) -> Self {
        Self { limits, pool }
    }

    #[must_use]
    pub fn with_limits(limits: ParserLimits) -> Self {
        Self::new(limits, Arc::new(BufferPool::default()))
    }

    #[must_use]
    pub fn limits(&self) -> &ParserLimits {
        &self.limits
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Try to extract one request from the front of `input`.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] for malformed framing or exceeded limits. The
    /// caller should answer with [`ParseError::status`] and close the
    /// connection.
    pub fn try_parse(&self, input: &ByteSequence) -> Result<ParseStatus, ParseError> {
        let Some(head_end) = input.find(HEADER_END, 0) else {
            if input.len() > self.limits.max_header_size {
                return Err(ParseError::new(
                    ParseErrorKind::HeadersTooLarge,
                    "header section exceeds limit",
                ));
            }
            return Ok(ParseStatus::Incomplete);
        };
        let body_start = head_end + HEADER_END.len();
        if body_start > self.limits.max_header_size {
            return Err(ParseError::new(
                ParseErrorKind::HeadersTooLarge,
                "header section exceeds limit",
            ));
        }

        let head = input.slice(0..head_end).to_contiguous();
        let mut lines = head.split(|&b| b == b'\n').map(|l| l.strip_suffix(b"\r").unwrap_or(l));

        let request_line = lines.next().unwrap_or_default();
        let (method, target, version) = parse_request_line(request_line)?;

        let mut headers = Headers::with_capacity(16);
        for line in lines {
            if headers.len() >= self.limits.max_headers {
                return Err(ParseError::new(
                    ParseErrorKind::TooManyHeaders,
                    "too many header lines",
                ));
            }
            let Some(colon) = memchr::memchr(b':', line) else {
                return Err(ParseError::new(
                    ParseErrorKind::MalformedHeader,
                    "header line without ':'",
                ));
            };
            let name = trim_ascii(latin1(&line[..colon]));
            if name.is_empty() {
                return Err(ParseError::new(
                    ParseErrorKind::MalformedHeader,
                    "empty header name",
                ));
            }
            let value = trim_ascii(latin1(&line[colon + 1..]));
            headers.push(name, value);
        }

        if version == Version::HTTP_11 && headers.host().is_none() {
            return Err(ParseError::new(
                ParseErrorKind::MissingHost,
                "HTTP/1.1 request without Host",
            ));
        }

        let framing = resolve_framing(&headers);
        let (body, consumed) = match framing {
            Framing::None | Framing::Length(0) => (RequestBody::Empty, body_start),
            Framing::Length(len) => {
                if len > self.limits.max_body_size {
                    return Err(ParseError::new(
                        ParseErrorKind::BodyTooLarge,
                        "declared Content-Length exceeds limit",
                    ));
                }
                if input.len() - body_start < len {
                    return Ok(ParseStatus::Incomplete);
                }
                let end = body_start + len;
                (RequestBody::Slice(input.slice(body_start..end)), end)
            }
            Framing::Chunked => match self.decode_chunked(input, body_start)? {
                Some((buf, end)) => (RequestBody::Pooled(buf), end),
                None => return Ok(ParseStatus::Incomplete),
            },
        };

        let keep_alive = keep_alive(version, &headers);
        let (raw_path, query_string) = match target.split_once('?') {
            Some((p, q)) => (p, q),
            None => (target.as_str(), ""),
        };
        let request = Request {
            method,
            path: decode_path(raw_path).into_owned(),
            target: target.clone(),
            version,
            query_string: query_string.to_string(),
            query: parse_query(query_string),
            headers,
            body,
            keep_alive,
        };
        debug!(
            method = %request.method,
            target = %request.target,
            consumed,
            "request parsed"
        );
        Ok(ParseStatus::Complete { request, consumed })
    }

    /// Decode a chunked body starting at `pos`.
    ///
    /// Returns `Ok(None)` when more bytes are needed; the partially filled
    /// buffer is released on that path.
    fn decode_chunked(
        &self,
        input: &ByteSequence,
        mut pos: usize,
    ) -> Result<Option<(PooledBuffer, usize)>, ParseError> {
        let mut buf = self.pool.acquire();
        loop {
            let Some(line_end) = input.find(CRLF, pos) else {
                if input.len() - pos > MAX_CHUNK_LINE {
                    return Err(ParseError::new(
                        ParseErrorKind::InvalidChunk,
                        "chunk size line too long",
                    ));
                }
                return Ok(None);
            };
            let size = parse_chunk_size(&input.copy_range(pos..line_end))?;
            pos = line_end + CRLF.len();

            if size == 0 {
                // Optional trailers, then an empty line.
                if input.len() < pos + CRLF.len() {
                    return Ok(None);
                }
                if input.byte_at(pos) == Some(b'\r') && input.byte_at(pos + 1) == Some(b'\n') {
                    return Ok(Some((buf, pos + CRLF.len())));
                }
                return match input.find(HEADER_END, pos) {
                    Some(t) => Ok(Some((buf, t + HEADER_END.len()))),
                    None if input.len() - pos > self.limits.max_header_size => {
                        Err(ParseError::new(
                            ParseErrorKind::HeadersTooLarge,
                            "chunked trailers exceed header limit",
                        ))
                    }
                    None => Ok(None),
                };
            }

            let too_large = || {
                ParseError::new(ParseErrorKind::BodyTooLarge, "chunked body exceeds limit")
            };
            if size > self.limits.max_body_size {
                return Err(too_large());
            }
            let total = buf.len().checked_add(size).ok_or_else(too_large)?;
            if total > self.limits.max_body_size {
                return Err(too_large());
            }
            let data_end = pos.checked_add(size).ok_or_else(too_large)?;
            if input.len() < data_end + CRLF.len() {
                return Ok(None);
            }
            for seg in input.slice(pos..data_end).segments() {
                buf.extend_from_slice(seg);
            }
            if input.byte_at(data_end) != Some(b'\r') || input.byte_at(data_end + 1) != Some(b'\n') {
                return Err(ParseError::new(
                    ParseErrorKind::InvalidChunk,
                    "chunk data not followed by CRLF",
                ));
            }
            pos = data_end + CRLF.len();
        }
    }
}

fn parse_request_line(line: &[u8]) -> Result<(Method, String, Version), ParseError> {
    let malformed = || {
        ParseError::new(
            ParseErrorKind::MalformedRequestLine,
            "expected METHOD SP target SP version",
        )
    };
    let mut parts = line.split(|&b| b == b' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed());
    };
    if method.is_empty() || target.is_empty() {
        return Err(malformed());
    }
    let method = Method::from_bytes(method).map_err(|_| malformed())?;
    if target.first() != Some(&b'/') {
        return Err(ParseError::new(
            ParseErrorKind::InvalidTarget,
            "request target must start with '/'",
        ));
    }
    let version = match version {
        b"HTTP/1.1" => Version::HTTP_11,
        b"HTTP/1.0" => Version::HTTP_10,
        _ => {
            return Err(ParseError::new(
                ParseErrorKind::UnsupportedVersion,
                "only HTTP/1.0 and HTTP/1.1 are supported",
            ))
        }
    };
    Ok((method, latin1(target), version))
}

fn resolve_framing(headers: &Headers) -> Framing {
    let chunked = headers
        .get_all("transfer-encoding")
        .any(|v| v.to_ascii_lowercase().contains("chunked"));
    if chunked {
        return Framing::Chunked;
    }
    // First value that is a valid non-negative integer wins.
    headers
        .get_all("content-length")
        .find_map(|v| parse_content_length(v))
        .map_or(Framing::None, Framing::Length)
}

fn parse_content_length(value: &str) -> Option<usize> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn keep_alive(version: Version, headers: &Headers) -> bool {
    let has = |token: &str| {
        headers
            .get_all("connection")
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    };
    if version == Version::HTTP_11 {
        !has("close")
    } else {
        has("keep-alive")
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ParseError> {
    let invalid = || ParseError::new(ParseErrorKind::InvalidChunk, "invalid chunk size");
    let digits = match memchr::memchr(b';', line) {
        Some(i) => &line[..i],
        None => line,
    };
    let digits = digits.trim_ascii();
    if digits.is_empty() || digits.len() > 16 {
        return Err(invalid());
    }
    let text = std::str::from_utf8(digits).map_err(|_| invalid())?;
    usize::from_str_radix(text, 16).map_err(|_| invalid())
}

/// Single-byte decoding for protocol tokens.
fn latin1(bytes: &[u8]) -> String {
    if bytes.is_ascii() {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        bytes.iter().map(|&b| char::from(b)).collect()
    }
}

fn trim_ascii(s: String) -> String {
    let trimmed = s.trim_matches(|c: char| c.is_ascii_whitespace());
    if trimmed.len() == s.len() {
        s
    } else {
        trimmed.to_string()
    }
}
