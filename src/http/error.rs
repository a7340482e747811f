use thiserror::Error;

/// What went wrong while parsing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Request line is not `METHOD SP target SP version`.
    MalformedRequestLine,
    /// Request target does not start with `/`.
    InvalidTarget,
    /// Protocol is not HTTP/1.0 or HTTP/1.1.
    UnsupportedVersion,
    /// A header line has no `:` separator.
    MalformedHeader,
    /// More header lines than allowed.
    TooManyHeaders,
    /// HTTP/1.1 request without a `Host` header.
    MissingHost,
    /// Chunk size line or chunk terminator is invalid.
    InvalidChunk,
    /// Header section exceeded the configured maximum.
    HeadersTooLarge,
    /// Body exceeded the configured maximum.
    BodyTooLarge,
}

/// Protocol or resource-limit error raised by [`RequestParser`](super::RequestParser).
///
/// The connection layer writes [`ParseError::status`] and then closes the
/// connection, since the framing of whatever follows cannot be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?}: {detail}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub detail: &'static str,
}

impl ParseError {
    pub(crate) const fn new(kind: ParseErrorKind, detail: &'static str) -> Self {
        Self { kind, detail }
    }

    /// Suggested HTTP status for the error response.
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self.kind {
            ParseErrorKind::HeadersTooLarge | ParseErrorKind::BodyTooLarge => 413,
            ParseErrorKind::UnsupportedVersion => 505,
            _ => 400,
        }
    }

    /// Short reason text used for the error body.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self.status() {
            413 => "Payload Too Large",
            505 => "HTTP Version Not Supported",
            _ => "Bad Request",
        }
    }
}
