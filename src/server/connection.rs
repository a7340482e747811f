use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, Version};
use tracing::{debug, error, warn};

use super::service::App;
use super::session::Session;
use crate::http::{write_response, ByteSequence, HandlerResponse, ParseStatus};

/// Serve HTTP/1.x requests on `stream` until it closes, a response asks for
/// `Connection: close`, or a protocol upgrade takes the stream over.
///
/// Bytes are accumulated in a [`ByteSequence`] and the parser is retried
/// after every read until a full request is buffered. Parse errors are
/// answered with their status and end the connection, since the framing of
/// whatever follows cannot be trusted.
///
/// # Errors
///
/// I/O errors from reading or writing the stream.
pub fn serve_connection<S>(stream: &mut S, peer: Option<SocketAddr>, app: &App) -> io::Result<()>
where
    S: Read + Write + Send,
{
    let mut input = ByteSequence::new();
    let mut buf = vec![0u8; app.read_buffer_size()];

    loop {
        let (request, consumed) = match app.parser().try_parse(&input) {
            Ok(ParseStatus::Complete { request, consumed }) => (request, consumed),
            Ok(ParseStatus::Incomplete) => {
                let n = match stream.read(&mut buf) {
                    Ok(n) => n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                };
                if n == 0 {
                    if !input.is_empty() {
                        debug!(peer = ?peer, buffered = input.len(), "Connection closed mid-request");
                    }
                    return Ok(());
                }
                input.append(Bytes::copy_from_slice(&buf[..n]));
                continue;
            }
            Err(e) => {
                warn!(peer = ?peer, error = %e, status = e.status(), "Request parse failed");
                write_response(
                    stream,
                    HandlerResponse::error(e.status(), e.reason()),
                    Version::HTTP_11,
                    false,
                    false,
                )?;
                return Ok(());
            }
        };
        input.consume(consumed);

        let version = request.version;
        let head_request = request.method == Method::HEAD;
        let keep_alive = app.keep_alive() && request.keep_alive;
        let mut session = Session::new(request, peer, Arc::clone(app.json_engine()));

        let aborted = match app.handle(&mut session) {
            Ok(()) => false,
            Err(e) => {
                error!(
                    request_id = %session.request_id(),
                    error = %e,
                    "Request aborted"
                );
                if !session.is_sent() {
                    session.send(HandlerResponse::error(e.status(), "Internal Server Error"))
                        .map_err(|e| io::Error::other(e.to_string()))?;
                }
                true
            }
        };

        let response = session
            .take_response()
            .unwrap_or_else(|| HandlerResponse::error(500, "Internal Server Error"));
        let upgrade = session.take_upgrade();
        let keep_alive = keep_alive && !aborted && upgrade.is_none();
        let keep_alive = write_response(stream, response, version, keep_alive, head_request)?;
        drop(session);

        if let Some(handler) = upgrade {
            debug!(peer = ?peer, leftover = input.len(), "Connection upgraded");
            handler.run(stream, std::mem::take(&mut input));
            return Ok(());
        }
        if !keep_alive {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{Middleware, Next, PipelineError};
    use crate::router::{Router, RouterOptions};
    use crate::websocket;

    fn app() -> App {
        let router = Router::builder(RouterOptions::default())
            .route("GET", "/a", |_s: &mut Session| "A")
            .route("POST", "/echo", |s: &mut Session| {
                String::from_utf8_lossy(&s.request().body.contiguous()).into_owned()
            })
            .route("GET", "/ws", |s: &mut Session| {
                websocket::accept(s.request(), |stream, leftover| {
                    let _ = stream.write_all(&leftover.copy_to_vec());
                    let _ = stream.write_all(b"|upgraded");
                })
                .unwrap_or_else(|e| crate::dispatcher::Reply::Response(HandlerResponse::error(e.status(), "bad handshake")))
            })
            .build()
            .unwrap();
        App::new(router)
    }

    fn text(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_pipelined_keep_alive() {
        let out = text(app().respond_to_bytes(
            b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nPOST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello",
        ));
        assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 2);
        assert!(out.ends_with("hello"));
    }

    #[test]
    fn test_chunked_body() {
        let out = text(app().respond_to_bytes(
            b"POST /echo HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n",
        ));
        assert!(out.ends_with("abcde"), "{out}");
    }

    #[test]
    fn test_connection_close_stops_loop() {
        let out = text(app().respond_to_bytes(
            b"GET /a HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\nGET /a HTTP/1.1\r\nHost: x\r\n\r\n",
        ));
        assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 1);
        assert!(out.contains("connection: close\r\n"));
    }

    #[test]
    fn test_parse_error_closes() {
        let out = text(app().respond_to_bytes(b"GET /a HTTP/1.1\r\nBroken\r\n\r\nGET /a HTTP/1.1\r\nHost: x\r\n\r\n"));
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{out}");
        assert_eq!(out.matches("HTTP/1.1").count(), 1);
    }

    #[test]
    fn test_head_has_no_body() {
        let out = text(app().respond_to_bytes(b"HEAD /a HTTP/1.1\r\nHost: x\r\n\r\n"));
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("content-length: 1\r\n"));
        assert!(out.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_websocket_upgrade_hands_over_stream() {
        let out = text(app().respond_to_bytes(
            b"GET /ws HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\nFRAME",
        ));
        assert!(out.starts_with("HTTP/1.1 101 Switching Protocols\r\n"), "{out}");
        assert!(out.contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
        assert!(out.ends_with("\r\n\r\nFRAME|upgraded"));
    }

    struct Twice;

    impl Middleware for Twice {
        fn handle(&self, s: &mut Session, next: &mut Next<'_>) -> Result<(), PipelineError> {
            next.run(s)?;
            next.run(s)
        }
    }

    #[test]
    fn test_reused_continuation_aborts_connection() {
        let out = text(app().with(Twice).respond_to_bytes(
            b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /a HTTP/1.1\r\nHost: x\r\n\r\n",
        ));
        assert_eq!(out.matches("HTTP/1.1").count(), 1);
        assert!(out.contains("connection: close\r\n"));
    }
}
