//! `multipart/form-data` body parsing.
//!
//! Both entry points are fail-closed: any malformed part, a part without a
//! `Content-Disposition: form-data; name=...` header, too many parts, or an
//! oversized file makes the whole parse return nothing. Callers typically map
//! that onto a 400.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;

use bytes::Bytes;
use memchr::memmem;

use super::sequence::ByteSequence;
use crate::buffer::BufferPool;

pub const DEFAULT_MAX_PARTS: usize = 100;
pub const DEFAULT_MAX_FILE_BYTES: usize = 10 * 1024 * 1024;

/// Bounds applied while scanning a multipart body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipartLimits {
    /// Maximum number of parts scanned.
    pub max_parts: usize,
    /// Maximum size of a single file part.
    pub max_file_bytes: usize,
}

impl Default for MultipartLimits {
    fn default() -> Self {
        Self {
            max_parts: DEFAULT_MAX_PARTS,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

/// An uploaded file held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileField {
    pub name: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Result of a buffered multipart parse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    pub fields: HashMap<String, String>,
    pub files: Vec<FileField>,
}

impl FormData {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn file(&self, name: &str) -> Option<&FileField> {
        self.files.iter().find(|f| f.name == name)
    }
}

/// A file part located inside the original body sequence.
///
/// Nothing is copied until [`FilePart::copy_to`] streams the range out.
#[derive(Debug, Clone, Copy)]
pub struct FilePart<'a> {
    pub name: &'a str,
    pub filename: &'a str,
    pub content_type: Option<&'a str>,
    /// Offset of the file content within `source`.
    pub offset: usize,
    pub len: usize,
    source: &'a ByteSequence,
}

impl FilePart<'_> {
    /// Zero-copy view of the file content.
    #[must_use]
    pub fn bytes(&self) -> ByteSequence {
        self.source.slice(self.offset..self.offset + self.len)
    }

    /// Stream the file content into `sink`, returning the number of bytes written.
    pub fn copy_to<W: Write + ?Sized>(&self, sink: &mut W) -> io::Result<u64> {
        let mut written = 0u64;
        for seg in self.bytes().segments() {
            sink.write_all(seg)?;
            written += seg.len() as u64;
        }
        Ok(written)
    }
}

/// Extract the boundary from a `multipart/form-data` content type.
///
/// Returns `None` for any other media type or when the boundary is missing.
#[must_use]
pub fn parse_boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let media = params.next()?.trim();
    if !media.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params.find_map(|p| {
        let (key, value) = p.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Parse a fully buffered body.
#[must_use]
pub fn parse(body: &Bytes, boundary: &str, limits: &MultipartLimits) -> Option<FormData> {
    let parts = scan(body, boundary, limits)?;
    let mut form = FormData::default();
    for part in parts {
        let content = &body[part.start..part.end];
        match part.filename {
            Some(filename) => form.files.push(FileField {
                name: part.name,
                filename,
                content_type: part.content_type,
                data: body.slice(part.start..part.end),
            }),
            None => {
                form.fields
                    .insert(part.name, String::from_utf8_lossy(content).into_owned());
            }
        }
    }
    Some(form)
}

/// Parse without materialising file contents.
///
/// Fields are handed to `on_field`; files are handed to `on_file` as
/// [`FilePart`] views into `body`. A body spread over several segments is
/// first copied into one pooled buffer for scanning. Callbacks only run once
/// the whole body has been validated, so a `false` return means none ran.
pub fn parse_streaming<F, G>(
    body: &ByteSequence,
    boundary: &str,
    limits: &MultipartLimits,
    pool: &Arc<BufferPool>,
    mut on_field: F,
    mut on_file: G,
) -> bool
where
    F: FnMut(&str, &str),
    G: FnMut(FilePart<'_>),
{
    let scratch;
    let contiguous: &[u8] = match body.segments().next() {
        Some(only) if body.is_single_segment() => &only[..],
        None => &[],
        Some(_) => {
            let mut buf = pool.acquire();
            buf.reserve(body.len());
            for seg in body.segments() {
                buf.extend_from_slice(seg);
            }
            scratch = buf;
            scratch.as_slice()
        }
    };

    let Some(parts) = scan(contiguous, boundary, limits) else {
        return false;
    };
    for part in &parts {
        match &part.filename {
            Some(filename) => on_file(FilePart {
                name: &part.name,
                filename,
                content_type: part.content_type.as_deref(),
                offset: part.start,
                len: part.end - part.start,
                source: body,
            }),
            None => on_field(
                &part.name,
                &String::from_utf8_lossy(&contiguous[part.start..part.end]),
            ),
        }
    }
    true
}

struct RawPart {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    start: usize,
    end: usize,
}

fn scan(data: &[u8], boundary: &str, limits: &MultipartLimits) -> Option<Vec<RawPart>> {
    if boundary.is_empty() {
        return None;
    }
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let separator = format!("\r\n--{boundary}");
    let separator = memmem::Finder::new(separator.as_bytes());

    let mut pos = memmem::find(data, delimiter)? + delimiter.len();
    let mut parts = Vec::new();
    loop {
        let rest = data.get(pos..)?;
        if rest.starts_with(b"--") {
            return Some(parts);
        }
        if !rest.starts_with(b"\r\n") {
            return None;
        }
        pos += 2;
        if parts.len() >= limits.max_parts {
            return None;
        }

        // An empty header block cannot carry Content-Disposition.
        if data[pos..].starts_with(b"\r\n") {
            return None;
        }
        let header_end = pos + memmem::find(&data[pos..], b"\r\n\r\n")?;
        let mut part = parse_part_headers(&data[pos..header_end])?;
        part.start = header_end + 4;
        part.end = part.start + separator.find(&data[part.start..])?;
        if part.filename.is_some() && part.end - part.start > limits.max_file_bytes {
            return None;
        }
        pos = part.end + 2 + delimiter.len();
        parts.push(part);
    }
}

fn parse_part_headers(block: &[u8]) -> Option<RawPart> {
    let text = String::from_utf8_lossy(block);
    let mut disposition = None;
    let mut content_type = None;
    for line in text.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.eq_ignore_ascii_case("content-disposition") {
            disposition = Some(value.trim().to_string());
        } else if name.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.trim().to_string());
        }
    }

    let disposition = disposition?;
    let mut params = disposition.split(';');
    if !params.next()?.trim().eq_ignore_ascii_case("form-data") {
        return None;
    }
    let mut name = None;
    let mut filename = None;
    for p in params {
        let Some((key, value)) = p.split_once('=') else {
            continue;
        };
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value)
            .to_string();
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => name = Some(value),
            "filename" => filename = Some(value),
            _ => {}
        }
    }
    Some(RawPart {
        name: name?,
        filename,
        content_type,
        start: 0,
        end: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = b"preamble\r\n--XyZ\r\n\
Content-Disposition: form-data; name=\"title\"\r\n\r\n\
Hello world\r\n--XyZ\r\n\
Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\
Content-Type: text/plain\r\n\r\n\
file\r\ncontent\r\n--XyZ--\r\n";

    #[test]
    fn test_parse_boundary() {
        assert_eq!(
            parse_boundary("multipart/form-data; boundary=abc").as_deref(),
            Some("abc")
        );
        assert_eq!(
            parse_boundary("Multipart/Form-Data; charset=utf-8; boundary=\"a b\"").as_deref(),
            Some("a b")
        );
        assert_eq!(parse_boundary("application/json; boundary=abc"), None);
        assert_eq!(parse_boundary("multipart/form-data"), None);
    }

    #[test]
    fn test_parse_fields_and_files() {
        let body = Bytes::from_static(BODY);
        let form = parse(&body, "XyZ", &MultipartLimits::default()).unwrap();
        assert_eq!(form.field("title"), Some("Hello world"));
        let file = form.file("upload").unwrap();
        assert_eq!(file.filename, "a.txt");
        assert_eq!(file.content_type.as_deref(), Some("text/plain"));
        assert_eq!(&file.data[..], b"file\r\ncontent");
    }

    #[test]
    fn test_missing_disposition_fails_closed() {
        let body = Bytes::from_static(
            b"--b\r\nContent-Disposition: form-data; name=\"ok\"\r\n\r\n1\r\n--b\r\nContent-Type: text/plain\r\n\r\n2\r\n--b--",
        );
        assert!(parse(&body, "b", &MultipartLimits::default()).is_none());
    }

    #[test]
    fn test_empty_part_headers_fail_closed() {
        let body = Bytes::from_static(
            b"--b\r\n\r\nX\r\n--b\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nv\r\n--b--",
        );
        assert!(parse(&body, "b", &MultipartLimits::default()).is_none());
    }

    #[test]
    fn test_limits() {
        let body = Bytes::from_static(BODY);
        let few_parts = MultipartLimits {
            max_parts: 1,
            ..MultipartLimits::default()
        };
        assert!(parse(&body, "XyZ", &few_parts).is_none());
        let small_files = MultipartLimits {
            max_file_bytes: 4,
            ..MultipartLimits::default()
        };
        assert!(parse(&body, "XyZ", &small_files).is_none());
    }

    #[test]
    fn test_unterminated_part_fails() {
        let body = Bytes::from_static(b"--b\r\nContent-Disposition: form-data; name=\"x\"\r\n\r\nno end");
        assert!(parse(&body, "b", &MultipartLimits::default()).is_none());
    }

    #[test]
    fn test_streaming_over_segments() {
        let whole = Bytes::from_static(BODY);
        let seq = ByteSequence::from_segments([whole.slice(..40), whole.slice(40..100), whole.slice(100..)]);
        let pool = BufferPool::shared(2, 64);

        let mut fields = Vec::new();
        let mut copied = Vec::new();
        let ok = parse_streaming(
            &seq,
            "XyZ",
            &MultipartLimits::default(),
            &pool,
            |name, value| fields.push((name.to_string(), value.to_string())),
            |file| {
                assert_eq!(file.filename, "a.txt");
                file.copy_to(&mut copied).unwrap();
            },
        );
        assert!(ok);
        assert_eq!(fields, vec![("title".to_string(), "Hello world".to_string())]);
        assert_eq!(copied, b"file\r\ncontent");
        assert_eq!(pool.outstanding(), 0);
    }
}
