use std::sync::Arc;

use thiserror::Error;
use tracing::{error, warn};

use crate::http::HandlerResponse;
use crate::server::{SendError, Session};

/// Failure that aborts the pipeline for the current request.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A middleware called its continuation more than once.
    #[error("continuation of middleware `{middleware}` was invoked twice")]
    ContinuationReused { middleware: &'static str },
    #[error(transparent)]
    Send(#[from] SendError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    #[must_use]
    pub fn status(&self) -> u16 {
        500
    }
}

/// Request interceptor.
///
/// `handle` either answers the request itself (through
/// [`Session::send`]) and returns, or calls [`Next::run`] exactly once.
/// Code placed after `next.run(..)` is the after-phase; it runs in reverse
/// registration order and can still decorate the response.
pub trait Middleware: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str {
        "middleware"
    }

    /// # Errors
    ///
    /// [`PipelineError`] aborts the request.
    fn handle(&self, session: &mut Session, next: &mut Next<'_>) -> Result<(), PipelineError>;
}

/// Final stage of the pipeline, usually routing and dispatch.
pub type Terminal<'a> = &'a (dyn Fn(&mut Session) -> Result<(), PipelineError> + Send + Sync);

/// Single-use continuation handed to a middleware.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
    terminal: Terminal<'a>,
    owner: &'static str,
    used: bool,
}

impl<'a> Next<'a> {
    fn new(rest: &'a [Arc<dyn Middleware>], terminal: Terminal<'a>, owner: &'static str) -> Self {
        Self {
            rest,
            terminal,
            owner,
            used: false,
        }
    }

    /// Run the remainder of the chain.
    ///
    /// # Errors
    ///
    /// [`PipelineError::ContinuationReused`] on a second call, otherwise
    /// whatever the downstream chain returns.
    pub fn run(&mut self, session: &mut Session) -> Result<(), PipelineError> {
        if self.used {
            error!(
                request_id = %session.request_id(),
                middleware = self.owner,
                "Middleware continuation invoked twice"
            );
            return Err(PipelineError::ContinuationReused {
                middleware: self.owner,
            });
        }
        self.used = true;
        run_chain(self.rest, self.terminal, session)
    }

    #[must_use]
    pub fn is_used(&self) -> bool {
        self.used
    }
}

fn run_chain(
    chain: &[Arc<dyn Middleware>],
    terminal: Terminal<'_>,
    session: &mut Session,
) -> Result<(), PipelineError> {
    let Some((head, rest)) = chain.split_first() else {
        return terminal(session);
    };
    let mut next = Next::new(rest, terminal, head.name());
    head.handle(session, &mut next)?;
    if !next.used && !session.is_sent() {
        warn!(
            request_id = %session.request_id(),
            middleware = head.name(),
            "Middleware neither responded nor continued"
        );
        session.send(HandlerResponse::error(500, "Internal Server Error"))?;
    }
    Ok(())
}

/// Ordered middleware chain, fixed at startup.
#[derive(Clone, Default)]
pub struct Pipeline {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.middleware.iter().map(|m| m.name()).collect();
        f.debug_struct("Pipeline").field("middleware", &names).finish()
    }
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware; registration order is execution order.
    #[must_use]
    pub fn with<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middleware.push(middleware);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Run the chain for one request, ending in `terminal`.
    ///
    /// # Errors
    ///
    /// The first [`PipelineError`] raised by a middleware or the terminal.
    pub fn run(
        &self,
        session: &mut Session,
        terminal: Terminal<'_>,
    ) -> Result<(), PipelineError> {
        run_chain(&self.middleware, terminal, session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Request;
    use http::Method;
    use parking_lot::Mutex;

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Middleware for Recorder {
        fn handle(&self, session: &mut Session, next: &mut Next<'_>) -> Result<(), PipelineError> {
            self.log.lock().push(format!("{} before", self.label));
            next.run(session)?;
            self.log.lock().push(format!("{} after", self.label));
            Ok(())
        }
    }

    struct ShortCircuit;

    impl Middleware for ShortCircuit {
        fn handle(&self, session: &mut Session, _next: &mut Next<'_>) -> Result<(), PipelineError> {
            session.send_status(403)?;
            Ok(())
        }
    }

    struct Twice;

    impl Middleware for Twice {
        fn name(&self) -> &'static str {
            "twice"
        }

        fn handle(&self, session: &mut Session, next: &mut Next<'_>) -> Result<(), PipelineError> {
            next.run(session)?;
            next.run(session)
        }
    }

    struct Silent;

    impl Middleware for Silent {
        fn handle(&self, _session: &mut Session, _next: &mut Next<'_>) -> Result<(), PipelineError> {
            Ok(())
        }
    }

    fn session() -> Session {
        Session::for_request(Request::new(Method::GET, "/"))
    }

    fn ok_terminal(s: &mut Session) -> Result<(), PipelineError> {
        s.send_text(200, "done")?;
        Ok(())
    }

    #[test]
    fn test_onion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .with(Recorder {
                label: "a",
                log: Arc::clone(&log),
            })
            .with(Recorder {
                label: "b",
                log: Arc::clone(&log),
            });
        let mut s = session();
        pipeline.run(&mut s, &ok_terminal).unwrap();
        assert_eq!(
            *log.lock(),
            vec!["a before", "b before", "b after", "a after"]
        );
        assert_eq!(s.take_response().unwrap().status, 200);
    }

    #[test]
    fn test_short_circuit_skips_terminal() {
        let pipeline = Pipeline::new().with(ShortCircuit);
        let mut s = session();
        let terminal = |_: &mut Session| -> Result<(), PipelineError> {
            panic!("terminal must not run")
        };
        pipeline.run(&mut s, &terminal).unwrap();
        assert_eq!(s.take_response().unwrap().status, 403);
    }

    #[test]
    fn test_double_continuation_is_detected() {
        let pipeline = Pipeline::new().with(Twice);
        let mut s = session();
        let err = pipeline.run(&mut s, &ok_terminal).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ContinuationReused { middleware: "twice" }
        ));
        // The terminal ran once; its response is the only one recorded.
        assert_eq!(s.take_response().unwrap().body_bytes(), b"done");
    }

    #[test]
    fn test_silent_middleware_yields_500() {
        let pipeline = Pipeline::new().with(Silent);
        let mut s = session();
        pipeline.run(&mut s, &ok_terminal).unwrap();
        assert_eq!(s.take_response().unwrap().status, 500);
    }
}
