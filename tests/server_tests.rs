use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use brrtserver::dispatcher::Reply;
use brrtserver::sse::{self, SseEvent};
use brrtserver::{websocket, App, HandlerResponse, HttpServer, Router, RouterOptions, ServerHandle, Session};

mod common;
use common::http_util::{chunked, get, parse_response, request};
use common::test_server::{send_request, setup_may_runtime};

fn start() -> ServerHandle {
    setup_may_runtime();
    let router = Router::builder(RouterOptions::default())
        .route("GET", "/hello", |_s: &mut Session| "world")
        .route("POST", "/echo", |s: &mut Session| {
            HandlerResponse::bytes(200, "application/octet-stream", s.request().body.to_bytes())
        })
        .route("GET", "/events", |_s: &mut Session| {
            let (tx, rx) = sse::channel();
            // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
            let producer = unsafe {
                may::coroutine::Builder::new().spawn(move || {
                    for i in 1..=3 {
                        tx.send_event(SseEvent::new(format!("tick {i}")).id(i.to_string()));
                    }
                })
            };
            assert!(producer.is_ok());
            HandlerResponse::sse(rx)
        })
        .route("GET", "/ws", |s: &mut Session| {
            websocket::accept(s.request(), |stream, _leftover| {
                // Echo raw bytes until the peer goes away.
                let mut buf = [0u8; 64];
                while let Ok(n) = stream.read(&mut buf) {
                    if n == 0 || stream.write_all(&buf[..n]).is_err() {
                        break;
                    }
                }
            })
            .unwrap_or_else(|e| Reply::Response(HandlerResponse::error(e.status(), "bad handshake")))
        })
        .build()
        .unwrap();
    let handle = HttpServer::new(App::new(router)).start("127.0.0.1:0").unwrap();
    handle.wait_ready().unwrap();
    handle
}

#[test]
fn test_keep_alive_and_pipelining_over_tcp() {
    let handle = start();
    let mut raw = get("/hello");
    raw.extend(chunked("POST", "/echo", b"streamed body", &[4, 4]));
    raw.extend(request("GET", "/hello", &[("Connection", "close")], b""));
    let out = String::from_utf8(send_request(&handle.addr(), &raw)).unwrap();
    handle.stop();

    assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 3, "{out}");
    assert!(out.contains("streamed body"));
    assert!(out.ends_with("world"));
}

#[test]
fn test_protocol_error_closes_connection() {
    let handle = start();
    let out = send_request(&handle.addr(), b"GET /hello HTTP/3.0\r\nHost: x\r\n\r\nGET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
    handle.stop();
    let res = parse_response(&out);
    assert_eq!(res.status, 505);
    assert_eq!(res.header("connection"), Some("close"));
    assert_eq!(String::from_utf8_lossy(&out).matches("HTTP/1.1 ").count(), 1);
}

#[test]
fn test_sse_stream_over_tcp() {
    let handle = start();
    let out = send_request(
        &handle.addr(),
        &request("GET", "/events", &[("Connection", "close")], b""),
    );
    handle.stop();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("content-type: text/event-stream\r\n"));
    assert!(text.contains("transfer-encoding: chunked\r\n"));
    for i in 1..=3 {
        assert!(text.contains(&format!("id: {i}\ndata: tick {i}\n\n")), "{text}");
    }
    assert!(text.ends_with("0\r\n\r\n"));
}

#[test]
fn test_websocket_upgrade_over_tcp() {
    let handle = start();
    let mut stream = TcpStream::connect(handle.addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream
        .write_all(
            b"GET /ws HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
        )
        .unwrap();

    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).unwrap();
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"), "{head}");
    assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));

    // The handler now owns the raw stream.
    stream.write_all(b"ping").unwrap();
    let mut echoed = [0u8; 4];
    stream.read_exact(&mut echoed).unwrap();
    assert_eq!(&echoed, b"ping");
    drop(stream);
    handle.stop();
}

#[test]
fn test_bad_websocket_handshake() {
    let handle = start();
    let out = send_request(
        &handle.addr(),
        &request(
            "GET",
            "/ws",
            &[("Upgrade", "websocket"), ("Connection", "Upgrade, close")],
            b"",
        ),
    );
    handle.stop();
    assert_eq!(parse_response(&out).status, 400);
}
