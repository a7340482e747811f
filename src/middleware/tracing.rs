use std::time::Instant;

use tracing::{info, info_span, warn};

use super::{Middleware, Next, PipelineError};
use crate::server::Session;

/// Opens a `request` span and logs status and latency once the rest of the
/// chain has run.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMiddleware;

impl Middleware for TracingMiddleware {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn handle(&self, session: &mut Session, next: &mut Next<'_>) -> Result<(), PipelineError> {
        let span = info_span!(
            "request",
            request_id = %session.request_id(),
            method = %session.request().method,
            path = %session.request().path,
        );
        let _entered = span.enter();
        let started = Instant::now();

        let result = next.run(session);

        let latency_ms = started.elapsed().as_millis() as u64;
        let status = session.response().map_or(0, |r| r.status);
        match &result {
            Ok(()) if status >= 500 => warn!(status, latency_ms, "Request failed"),
            Ok(()) => info!(status, latency_ms, "Request completed"),
            Err(e) => warn!(error = %e, latency_ms, "Request aborted"),
        }
        result
    }
}
