use std::sync::Arc;

use tracing::{debug, warn};

use super::connection::serve_connection;
use super::session::Session;
use crate::buffer::BufferPool;
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::http::{HandlerResponse, RequestParser};
use crate::json::{JsonEngine, SerdeJsonEngine};
use crate::middleware::{Middleware, Pipeline, PipelineError};
use crate::router::{Resolution, Router};

/// Everything a connection needs to answer requests: parser, middleware,
/// routes and the JSON engine. Shared read-only by all connections.
pub struct App {
    pipeline: Pipeline,
    router: Arc<Router>,
    dispatcher: Dispatcher,
    parser: RequestParser,
    json: Arc<dyn JsonEngine>,
    keep_alive: bool,
    read_buffer_size: usize,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("pipeline", &self.pipeline)
            .field("routes", &self.router.routes().count())
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

impl App {
    /// App with default limits and no middleware.
    #[must_use]
    pub fn new(router: Router) -> Self {
        Self::from_config(router, &ServerConfig::default())
    }

    /// App with the parser limits and connection settings from `config`.
    #[must_use]
    pub fn from_config(router: Router, config: &ServerConfig) -> Self {
        let pool = BufferPool::shared(config.pool_capacity, config.read_buffer_size);
        Self {
            pipeline: Pipeline::new(),
            router: Arc::new(router),
            dispatcher: Dispatcher::new(),
            parser: RequestParser::new(config.parser_limits(), pool),
            json: Arc::new(SerdeJsonEngine::default()),
            keep_alive: config.keep_alive,
            read_buffer_size: config.read_buffer_size.max(512),
        }
    }

    /// Append a middleware; registration order is before-phase order.
    #[must_use]
    pub fn with<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.pipeline.push(Arc::new(middleware));
        self
    }

    #[must_use]
    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    #[must_use]
    pub fn with_json_engine(mut self, engine: Arc<dyn JsonEngine>) -> Self {
        self.json = engine;
        self
    }

    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    #[must_use]
    pub fn parser(&self) -> &RequestParser {
        &self.parser
    }

    #[must_use]
    pub fn json_engine(&self) -> &Arc<dyn JsonEngine> {
        &self.json
    }

    #[must_use]
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    #[must_use]
    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    /// Run the middleware pipeline with route dispatch as its innermost
    /// step.
    ///
    /// # Errors
    ///
    /// [`PipelineError`] when a middleware aborts the request; the caller
    /// answers 500 if nothing was sent and closes the connection.
    pub fn handle(&self, session: &mut Session) -> Result<(), PipelineError> {
        let terminal = |s: &mut Session| self.dispatch(s);
        self.pipeline.run(session, &terminal)
    }

    fn dispatch(&self, session: &mut Session) -> Result<(), PipelineError> {
        let req = session.request();
        match self.router.resolve(&req.method, &req.path) {
            Resolution::Matched(found) => {
                if let Err(e) = self.dispatcher.invoke(&found, session) {
                    if !session.is_sent() {
                        session.send(HandlerResponse::error(e.status(), &e.public_message()))?;
                    }
                }
                Ok(())
            }
            Resolution::MethodNotAllowed(allowed) => {
                let allow = allowed
                    .iter()
                    .map(http::Method::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                debug!(method = %req.method, path = %req.path, allow = %allow, "Method not allowed");
                session.send(
                    HandlerResponse::error(405, "Method Not Allowed").with_header("allow", allow),
                )?;
                Ok(())
            }
            Resolution::NotFound => {
                debug!(method = %req.method, path = %req.path, "No route matched");
                session.send(HandlerResponse::error(404, "Not Found"))?;
                Ok(())
            }
        }
    }

    /// Feed raw request bytes through a full connection cycle and return
    /// everything written back. Meant for tests.
    #[must_use]
    pub fn respond_to_bytes(&self, input: &[u8]) -> Vec<u8> {
        let mut stream = MemoryStream::new(input);
        if let Err(e) = serve_connection(&mut stream, None, self) {
            warn!(error = %e, "In-memory connection failed");
        }
        stream.output
    }
}

/// Reads from a fixed buffer, then reports end of stream; collects writes.
struct MemoryStream<'a> {
    input: &'a [u8],
    output: Vec<u8>,
}

impl<'a> MemoryStream<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            output: Vec::new(),
        }
    }
}

impl std::io::Read for MemoryStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        std::io::Read::read(&mut self.input, buf)
    }
}

impl std::io::Write for MemoryStream<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::Next;
    use crate::router::RouterOptions;

    fn app() -> App {
        let router = Router::builder(RouterOptions::default())
            .route("GET", "/hello", |_s: &mut Session| "hi")
            .route("PUT", "/hello", |_s: &mut Session| ())
            .build()
            .unwrap();
        App::new(router)
    }

    fn text(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_routes_and_errors() {
        let app = app();
        let out = text(app.respond_to_bytes(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n"));
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"), "{out}");
        assert!(out.ends_with("hi"));

        let out = text(app.respond_to_bytes(b"DELETE /hello HTTP/1.1\r\nHost: x\r\n\r\n"));
        assert!(out.starts_with("HTTP/1.1 405"));
        assert!(out.contains("allow: GET, PUT, HEAD\r\n"));

        let out = text(app.respond_to_bytes(b"GET /nope HTTP/1.1\r\nHost: x\r\n\r\n"));
        assert!(out.starts_with("HTTP/1.1 404"));

        let out = text(app.respond_to_bytes(b"PUT /hello HTTP/1.1\r\nHost: x\r\n\r\n"));
        assert!(out.starts_with("HTTP/1.1 204"));
    }

    struct Header;

    impl Middleware for Header {
        fn handle(&self, s: &mut Session, next: &mut Next<'_>) -> Result<(), PipelineError> {
            next.run(s)?;
            if let Some(res) = s.response_mut() {
                res.set_header("x-seen", "1".to_string());
            }
            Ok(())
        }
    }

    #[test]
    fn test_middleware_wraps_dispatch() {
        let app = app().with(Header);
        let out = text(app.respond_to_bytes(b"GET /nope HTTP/1.1\r\nHost: x\r\n\r\n"));
        assert!(out.contains("x-seen: 1\r\n"));
    }
}
