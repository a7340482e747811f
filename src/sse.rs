//! # Server-Sent Events
//!
//! A handler creates a [`channel()`], hands the [`SseSender`] to a coroutine
//! that produces events, and returns the receiver as a streamed
//! `text/event-stream` response with [`HandlerResponse::sse`]. Each event is
//! written as soon as it is sent; the stream ends when every sender is
//! dropped.
//!
//! ```rust
//! use brrtserver::sse::{self, SseEvent};
//!
//! let (sender, receiver) = sse::channel();
//! sender.send("Event 1");
//! sender.send_event(SseEvent::new("line one\nline two").event("update").id("7"));
//! drop(sender);
//!
//! assert_eq!(
//!     receiver.collect(),
//!     "data: Event 1\n\nevent: update\nid: 7\ndata: line one\ndata: line two\n\n"
//! );
//! ```
//!
//! Clients consume the stream with the browser `EventSource` API.

use std::io;

use bytes::Bytes;
use may::sync::mpsc;

use crate::http::HandlerResponse;

/// One `text/event-stream` frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
    /// Reconnection delay hint in milliseconds.
    pub retry: Option<u64>,
}

impl SseEvent {
    #[must_use]
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn event(mut self, name: impl Into<String>) -> Self {
        self.event = Some(name.into());
        self
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn retry(mut self, ms: u64) -> Self {
        self.retry = Some(ms);
        self
    }

    /// Wire format. Multi-line data becomes one `data:` field per line;
    /// newlines in `event` and `id` are dropped.
    #[must_use]
    pub fn format(&self) -> String {
        let mut out = String::with_capacity(self.data.len() + 16);
        if let Some(event) = &self.event {
            field(&mut out, "event", event);
        }
        if let Some(id) = &self.id {
            field(&mut out, "id", id);
        }
        if let Some(retry) = self.retry {
            field(&mut out, "retry", &retry.to_string());
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line.strip_suffix('\r').unwrap_or(line));
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

fn field(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.extend(value.chars().filter(|c| *c != '\n' && *c != '\r'));
    out.push('\n');
}

/// Sender side of an SSE channel.
///
/// Clone this to send events from multiple coroutines.
#[derive(Clone)]
pub struct SseSender {
    tx: mpsc::Sender<SseEvent>,
}

impl SseSender {
    /// Send a data-only event. Returns `false` once the receiver is gone.
    pub fn send(&self, data: impl Into<String>) -> bool {
        self.send_event(SseEvent::new(data))
    }

    pub fn send_event(&self, event: SseEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Receiver side that converts queued events into `text/event-stream` frames.
pub struct SseReceiver {
    rx: mpsc::Receiver<SseEvent>,
}

impl SseReceiver {
    /// Block until every sender is dropped and return all frames.
    #[must_use]
    pub fn collect(self) -> String {
        let mut out = String::new();
        while let Ok(event) = self.rx.recv() {
            out.push_str(&event.format());
        }
        out
    }

    /// Frames as they arrive.
    pub fn frames(self) -> impl Iterator<Item = io::Result<Bytes>> + Send {
        std::iter::from_fn(move || self.rx.recv().ok())
            .map(|event| Ok(Bytes::from(event.format())))
    }
}

/// Create a new SSE channel returning the sender and receiver halves.
#[must_use]
pub fn channel() -> (SseSender, SseReceiver) {
    let (tx, rx) = mpsc::channel();
    (SseSender { tx }, SseReceiver { rx })
}

impl HandlerResponse {
    /// Streamed `200 text/event-stream` response fed by `receiver`.
    #[must_use]
    pub fn sse(receiver: SseReceiver) -> Self {
        HandlerResponse::stream(200, "text/event-stream", Box::new(receiver.frames()))
            .with_header("cache-control", "no-cache")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{write_response, Version};

    #[test]
    fn test_format_fields() {
        let ev = SseEvent::new("a\r\nb").event("tick\n").id("1").retry(3000);
        assert_eq!(ev.format(), "event: tick\nid: 1\nretry: 3000\ndata: a\ndata: b\n\n");
        assert_eq!(SseEvent::new("").format(), "data: \n\n");
    }

    #[test]
    fn test_streamed_response_is_chunked() {
        let (tx, rx) = channel();
        let producer = std::thread::spawn(move || {
            for i in 0..3 {
                tx.send(format!("n{i}"));
            }
        });
        producer.join().unwrap();
        let mut out = Vec::new();
        write_response(&mut out, HandlerResponse::sse(rx), Version::HTTP_11, true, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("content-type: text/event-stream\r\n"));
        assert!(text.contains("transfer-encoding: chunked\r\n"));
        assert!(text.contains("data: n2\n\n"));
        assert!(text.ends_with("0\r\n\r\n"));
    }
}
