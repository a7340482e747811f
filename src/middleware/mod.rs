//! Request interception around route dispatch.
//!
//! Each [`Middleware`] sees the request before the handler and, once its
//! [`Next`] continuation returns, the response slot after it. A middleware
//! short-circuits by sending a response and not calling `next.run`.

mod core;
mod cors;
mod firewall;
mod latency;
mod path_rules;
mod tracing;

pub use core::{Middleware, Next, Pipeline, PipelineError, Terminal};
pub use cors::{
    parse_route_cors_policy, CorsConfigError, CorsMiddleware, CorsMiddlewareBuilder, CorsPolicy,
    OriginValidation, RouteCorsConfig, RouteCorsPolicy,
};
pub use firewall::{
    CachedCountryResolver, Clock, CountryResolver, FirewallBuilder, FirewallMiddleware,
    FirewallRule, FixedWindowLimiter, InvalidNetwork, IpNetwork, ManualClock, RateLimit,
    RateLimitAlgorithm, RateLimiter, SlidingWindowLimiter, StaticCountryResolver, SystemClock,
    Verdict,
};
pub use latency::{LatencyMiddleware, LatencyRule};
pub use path_rules::PathRules;
pub use tracing::TracingMiddleware;

pub use crate::static_files::StaticFilesMiddleware;
