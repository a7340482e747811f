//! HTTP/1.1 wire handling: receive buffers, request parsing, multipart bodies
//! and response serialisation.

mod error;
pub mod multipart;
mod parser;
mod query;
mod request;
mod response;
mod sequence;

pub use error::{ParseError, ParseErrorKind};
pub use multipart::{FileField, FilePart, FormData, MultipartLimits};
pub use parser::{
    ParseStatus, ParserLimits, RequestParser, DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_HEADERS,
    DEFAULT_MAX_HEADER_SIZE,
};
pub use query::{decode_path, parse_query};
pub use request::{Headers, Request, RequestBody};
pub use response::{
    status_reason, write_response, BodyStream, HandlerResponse, HeaderVec, ResponseBody,
    MAX_INLINE_HEADERS,
};
pub use sequence::ByteSequence;

pub use http::{Method, Version};
