//! # brrtserver
//!
//! **brrtserver** is an embeddable, coroutine-powered HTTP/1.1 server built on the
//! [`may`](https://docs.rs/may) runtime. Each accepted connection runs on its own
//! coroutine: bytes are parsed incrementally without copying, the request passes
//! through an onion-style middleware pipeline, and the matched route's handler is
//! invoked with arguments bound from the path, query string and session.
//!
//! ## Architecture
//!
//! - **[`http`]** - Incremental request parser over segmented buffers, multipart
//!   forms, response serialisation
//! - **[`router`]** - Literal, parameterised, wildcard and regex routes with
//!   405 detection
//! - **[`dispatcher`]** - Per-route binding plans, argument conversion and handler
//!   invocation
//! - **[`middleware`]** - The [`Middleware`](middleware::Middleware) trait, the
//!   single-use continuation and the built-in tracing, CORS, firewall and
//!   latency-injection middleware
//! - **[`static_files`]** - File serving with caching, auto-index and
//!   conditional GET
//! - **[`server`]** - Sessions, the connection loop and the TCP listener
//! - **[`sse`]** / **[`websocket`]** - Server-Sent Events and the WebSocket
//!   upgrade handshake
//! - **[`config`]** / **[`logging`]** - YAML + environment configuration and
//!   `tracing` subscriber setup
//!
//! ## Request Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Conn as serve_connection
//!     participant Parser as RequestParser
//!     participant MW as Pipeline
//!     participant Router
//!     participant Dispatcher
//!     participant Handler
//!
//!     Client->>Conn: bytes
//!     Conn->>Parser: try_parse(&ByteSequence)
//!     Parser-->>Conn: Incomplete (read more) / Complete
//!     Conn->>MW: run(session)
//!     MW->>Router: resolve(method, path)
//!     Router-->>MW: Matched / MethodNotAllowed / NotFound
//!     MW->>Dispatcher: invoke(route, session)
//!     Dispatcher->>Handler: bound arguments
//!     Handler-->>Dispatcher: Reply
//!     Dispatcher-->>MW: response in session
//!     MW-->>Conn: after-phase unwinds
//!     Conn->>Client: write_response
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use brrtserver::{handler, App, HttpServer, Router, RouterOptions, ServerConfig, Session};
//! use brrtserver::middleware::TracingMiddleware;
//!
//! #[handler(get("/user/{login}"), defaults(limit = 10))]
//! fn get_user(login: String, limit: u32) -> String {
//!     format!("{login}:{limit}")
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = brrtserver::logging::init_logging(&brrtserver::logging::LogConfig::from_env())?;
//!     let config = ServerConfig::from_env()?;
//!
//!     let router = Router::builder(config.router_options())
//!         .handler(get_user_handler())
//!         .route("GET", "/health", |_s: &mut Session| "ok")
//!         .build()?;
//!     let app = App::from_config(router, &config).with(TracingMiddleware);
//!
//!     let handle = HttpServer::run(app, &config)?;
//!     handle.join().ok();
//!     Ok(())
//! }
//! ```
//!
//! ## Testing Without Sockets
//!
//! [`App::respond_to_bytes`] drives a full connection cycle over an in-memory
//! stream, which is how most of this crate's tests exercise the server.

extern crate self as brrtserver;

pub mod buffer;
pub mod config;
pub mod dispatcher;
pub mod http;
pub mod ids;
pub mod json;
pub mod logging;
pub mod middleware;
pub mod router;
pub mod server;
pub mod sse;
pub mod static_files;
pub mod websocket;

pub use brrtserver_macros::handler;

pub use config::{ConfigError, ServerConfig};
pub use dispatcher::{Dispatcher, HandlerDef, IntoReply, Json, ParamSpec, Reply};
pub use http::{HandlerResponse, Method, Request};
pub use router::{Resolution, Router, RouterOptions};
pub use server::{App, HttpServer, ServerHandle, Session};
