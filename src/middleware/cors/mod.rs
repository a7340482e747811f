mod builder;
mod error;
mod route_config;

pub use builder::CorsMiddlewareBuilder;
pub use error::CorsConfigError;
pub use route_config::{parse_route_cors_policy, RouteCorsConfig, RouteCorsPolicy};

use std::sync::Arc;

use http::Method;
use regex::Regex;
use tracing::{debug, warn};

use super::{Middleware, Next, PathRules, PipelineError};
use crate::http::{HandlerResponse, Request};
use crate::server::Session;

/// Origin validation strategy
#[derive(Clone)]
pub enum OriginValidation {
    /// Exact string matching
    Exact(Vec<String>),
    /// Wildcard (allow all origins)
    Wildcard,
    /// Regex pattern matching
    Regex(Vec<Regex>),
    /// Custom validation function
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl std::fmt::Debug for OriginValidation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OriginValidation::Exact(origins) => f.debug_tuple("Exact").field(origins).finish(),
            OriginValidation::Wildcard => write!(f, "Wildcard"),
            OriginValidation::Regex(patterns) => f
                .debug_tuple("Regex")
                .field(&patterns.iter().map(Regex::as_str).collect::<Vec<_>>())
                .finish(),
            OriginValidation::Custom(_) => write!(f, "Custom(<function>)"),
        }
    }
}

impl OriginValidation {
    fn is_allowed(&self, origin: &str) -> bool {
        match self {
            OriginValidation::Exact(origins) => origins.iter().any(|o| o == origin),
            OriginValidation::Wildcard => true,
            OriginValidation::Regex(patterns) => patterns.iter().any(|re| re.is_match(origin)),
            OriginValidation::Custom(validator) => validator(origin),
        }
    }

    fn is_wildcard(&self) -> bool {
        matches!(self, OriginValidation::Wildcard)
    }
}

/// One complete set of CORS settings.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    pub(crate) origin_validation: OriginValidation,
    pub(crate) allowed_headers: Vec<String>,
    pub(crate) allowed_methods: Vec<Method>,
    pub(crate) allow_credentials: bool,
    pub(crate) expose_headers: Vec<String>,
    pub(crate) max_age: Option<u32>,
}

impl Default for CorsPolicy {
    /// Secure default: no origins allowed.
    fn default() -> Self {
        Self {
            origin_validation: OriginValidation::Exact(vec![]),
            allowed_headers: vec!["Content-Type".into(), "Authorization".into()],
            allowed_methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ],
            allow_credentials: false,
            expose_headers: vec![],
            max_age: None,
        }
    }
}

impl CorsPolicy {
    pub(crate) fn validate(&self) -> Result<(), CorsConfigError> {
        if !self.allow_credentials {
            return Ok(());
        }
        match &self.origin_validation {
            OriginValidation::Wildcard => Err(CorsConfigError::WildcardWithCredentials),
            OriginValidation::Exact(o) if o.is_empty() => {
                Err(CorsConfigError::EmptyOriginsWithCredentials)
            }
            _ => Ok(()),
        }
    }

    /// Value for `Access-Control-Allow-Origin`, or `None` when the origin is
    /// rejected. Only one origin is ever echoed.
    fn validate_origin(&self, origin: &str) -> Option<String> {
        if !self.origin_validation.is_allowed(origin) {
            return None;
        }
        if self.origin_validation.is_wildcard() {
            Some("*".to_string())
        } else {
            Some(origin.to_string())
        }
    }

    fn methods_header(&self) -> String {
        self.allowed_methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Check the requested method and headers of a preflight.
    fn preflight(&self, req: &Request, origin: &str) -> Option<HandlerResponse> {
        let requested_method = req.header("access-control-request-method")?;
        let Ok(requested_method) = requested_method.trim().parse::<Method>() else {
            warn!(requested_method, "CORS preflight: invalid Access-Control-Request-Method");
            return None;
        };
        if !self.allowed_methods.contains(&requested_method) {
            warn!(method = %requested_method, "CORS preflight: method not in allowed methods");
            return None;
        }

        if let Some(requested) = req.header("access-control-request-headers") {
            let allow_all = self.allowed_headers.iter().any(|h| h == "*");
            if !allow_all {
                for header in requested.split(',').map(str::trim).filter(|h| !h.is_empty()) {
                    if !self
                        .allowed_headers
                        .iter()
                        .any(|h| h.eq_ignore_ascii_case(header))
                    {
                        warn!(header, "CORS preflight: header not in allowed headers");
                        return None;
                    }
                }
            }
        }

        let mut res = HandlerResponse::new(204)
            .with_header("access-control-allow-origin", origin)
            .with_header("access-control-allow-methods", self.methods_header())
            .with_header("access-control-allow-headers", self.allowed_headers.join(", "));
        if self.allow_credentials {
            res.set_header("access-control-allow-credentials", "true".to_string());
        }
        if let Some(age) = self.max_age {
            res.set_header("access-control-max-age", age.to_string());
        }
        res.set_header("vary", "Origin".to_string());
        Some(res)
    }

    fn decorate(&self, res: &mut HandlerResponse, origin: String) {
        res.set_header("access-control-allow-origin", origin);
        res.set_header("access-control-allow-methods", self.methods_header());
        res.set_header("access-control-allow-headers", self.allowed_headers.join(", "));
        if self.allow_credentials {
            res.set_header("access-control-allow-credentials", "true".to_string());
        }
        if !self.expose_headers.is_empty() {
            res.set_header("access-control-expose-headers", self.expose_headers.join(", "));
        }
        res.set_header("vary", "Origin".to_string());
    }
}

/// CORS (Cross-Origin Resource Sharing) middleware
///
/// Preflight requests (`OPTIONS` with `Origin` and
/// `Access-Control-Request-Method`) are answered here with `204` or `403`.
/// Other cross-origin requests with a rejected origin get `403`; accepted
/// ones continue and have the CORS headers added to whatever response comes
/// back. Same-origin requests pass through untouched.
///
/// Path overrides select a different policy (or none) by longest prefix.
///
/// ```rust
/// use brrtserver::middleware::CorsMiddlewareBuilder;
/// use http::Method;
///
/// let cors = CorsMiddlewareBuilder::new()
///     .allowed_origins(&["https://example.com"])
///     .allowed_methods(&[Method::GET, Method::POST])
///     .allow_credentials(true)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    policy: CorsPolicy,
    /// `None` disables CORS for the matching paths.
    overrides: PathRules<Option<CorsPolicy>>,
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self {
            policy: CorsPolicy::default(),
            overrides: PathRules::new(),
        }
    }
}

impl CorsMiddleware {
    pub(crate) fn from_parts(policy: CorsPolicy, overrides: PathRules<Option<CorsPolicy>>) -> Self {
        Self { policy, overrides }
    }

    /// All origins, no credentials. Development only.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            policy: CorsPolicy {
                origin_validation: OriginValidation::Wildcard,
                ..CorsPolicy::default()
            },
            overrides: PathRules::new(),
        }
    }

    fn policy_for(&self, path: &str) -> Option<&CorsPolicy> {
        match self.overrides.resolve(path) {
            Some(over) => over.as_ref(),
            None => Some(&self.policy),
        }
    }
}

/// Same-origin when the origin's authority equals the `Host` header.
fn is_same_origin(req: &Request, origin: &str) -> bool {
    let Some(host) = req.headers.host() else {
        return false;
    };
    let Some((_, authority)) = origin.split_once("://") else {
        return false;
    };
    let origin_host = authority.split(':').next().unwrap_or(authority);
    host.eq_ignore_ascii_case(authority) || host.eq_ignore_ascii_case(origin_host)
}

impl Middleware for CorsMiddleware {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn handle(&self, session: &mut Session, next: &mut Next<'_>) -> Result<(), PipelineError> {
        let req = session.request();
        let Some(policy) = self.policy_for(&req.path) else {
            return next.run(session);
        };
        let Some(origin) = req.header("origin").map(str::to_string) else {
            return next.run(session);
        };

        let is_preflight =
            req.method == Method::OPTIONS && req.header("access-control-request-method").is_some();
        if is_preflight {
            let response = policy
                .validate_origin(&origin)
                .and_then(|allowed| policy.preflight(req, &allowed));
            match response {
                Some(res) => session.send(res)?,
                None => {
                    warn!(origin = %origin, path = %req.path, "CORS preflight rejected");
                    session.send(HandlerResponse::new(403))?;
                }
            }
            return Ok(());
        }

        if is_same_origin(req, &origin) {
            debug!("CORS: same-origin request, skipping CORS headers");
            return next.run(session);
        }

        let Some(allowed) = policy.validate_origin(&origin) else {
            warn!(origin = %origin, path = %req.path, "CORS: invalid origin");
            session.send(HandlerResponse::new(403))?;
            return Ok(());
        };

        next.run(session)?;
        if let Some(res) = session.response_mut() {
            policy.decorate(res, allowed);
        }
        Ok(())
    }
}
