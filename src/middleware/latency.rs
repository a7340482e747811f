use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Middleware, Next, PathRules, PipelineError};
use crate::http::HandlerResponse;
use crate::server::Session;

/// Artificial delay and failure for one path scope.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LatencyRule {
    /// Always added, in milliseconds.
    pub fixed_ms: u64,
    /// Extra random delay drawn from `[min, max]` milliseconds.
    pub jitter_ms: Option<(u64, u64)>,
    /// Chance in `[0, 1]` of answering 503 instead of continuing.
    pub failure_rate: f64,
}

impl LatencyRule {
    #[must_use]
    pub fn fixed(ms: u64) -> Self {
        Self {
            fixed_ms: ms,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn jitter(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.jitter_ms = Some((min_ms.min(max_ms), min_ms.max(max_ms)));
        self
    }

    #[must_use]
    pub fn failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    fn delay<R: Rng>(&self, rng: &mut R) -> Duration {
        let jitter = match self.jitter_ms {
            Some((lo, hi)) if hi > lo => rng.random_range(lo..=hi),
            Some((lo, _)) => lo,
            None => 0,
        };
        Duration::from_millis(self.fixed_ms + jitter)
    }

    fn fails<R: Rng>(&self, rng: &mut R) -> bool {
        self.failure_rate > 0.0 && rng.random_bool(self.failure_rate.min(1.0))
    }
}

/// Chaos middleware: sleeps, and optionally fails, before continuing.
///
/// Rules resolve with the usual path precedence (exact, longest prefix,
/// catch-all). Sleeping yields the coroutine, not the worker thread.
#[derive(Debug, Clone, Default)]
pub struct LatencyMiddleware {
    rules: PathRules<LatencyRule>,
}

impl LatencyMiddleware {
    #[must_use]
    pub fn new(rules: PathRules<LatencyRule>) -> Self {
        Self { rules }
    }

    /// Same rule for every request.
    #[must_use]
    pub fn global(rule: LatencyRule) -> Self {
        Self {
            rules: PathRules::new().catch_all(rule),
        }
    }
}

impl Middleware for LatencyMiddleware {
    fn name(&self) -> &'static str {
        "latency"
    }

    fn handle(&self, session: &mut Session, next: &mut Next<'_>) -> Result<(), PipelineError> {
        let Some(rule) = self.rules.resolve(&session.request().path) else {
            return next.run(session);
        };
        let (delay, fail) = {
            let mut rng = rand::rng();
            (rule.delay(&mut rng), rule.fails(&mut rng))
        };
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "Injecting latency");
            may::coroutine::sleep(delay);
        }
        if fail {
            warn!(path = %session.request().path, "Injected failure");
            session.send(HandlerResponse::error(503, "Service Unavailable"))?;
            return Ok(());
        }
        next.run(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Request;
    use crate::middleware::Pipeline;
    use http::Method;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Instant;

    fn run(mw: LatencyMiddleware, path: &str) -> u16 {
        let pipeline = Pipeline::new().with(mw);
        let mut session = Session::for_request(Request::new(Method::GET, path));
        let terminal = |s: &mut Session| -> Result<(), PipelineError> {
            s.send_status(200)?;
            Ok(())
        };
        pipeline.run(&mut session, &terminal).unwrap();
        session.take_response().map_or(0, |r| r.status)
    }

    #[test]
    fn test_delay_within_jitter_range() {
        let rule = LatencyRule::fixed(5).jitter(20, 10);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let d = rule.delay(&mut rng).as_millis();
            assert!((15..=25).contains(&d), "delay {d}");
        }
    }

    #[test]
    fn test_failure_probability_extremes() {
        assert_eq!(run(LatencyMiddleware::global(LatencyRule::default().failure_rate(1.0)), "/"), 503);
        assert_eq!(run(LatencyMiddleware::global(LatencyRule::default()), "/"), 200);
    }

    #[test]
    fn test_rule_scoping_and_sleep() {
        let rules = PathRules::new()
            .prefix("/slow", LatencyRule::fixed(30))
            .exact("/slow/fast", LatencyRule::default().failure_rate(1.0));
        let mw = LatencyMiddleware::new(rules);
        let start = Instant::now();
        assert_eq!(run(mw.clone(), "/slow/x"), 200);
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(run(mw.clone(), "/slow/fast"), 503);
        assert_eq!(run(mw, "/other"), 200);
    }
}
