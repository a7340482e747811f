use std::sync::Arc;

use http::Method;
use regex::Regex;

use super::{CorsConfigError, CorsMiddleware, CorsPolicy, OriginValidation, RouteCorsPolicy};
use crate::middleware::PathRules;

enum Origins {
    List(Vec<String>),
    Patterns(Vec<String>),
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

/// Builder for creating `CorsMiddleware` with a fluent API
///
/// ```rust
/// use brrtserver::middleware::{CorsMiddlewareBuilder, RouteCorsPolicy};
/// use http::Method;
///
/// let cors = CorsMiddlewareBuilder::new()
///     .allowed_origins(&["https://example.com", "https://api.example.com"])
///     .allowed_methods(&[Method::GET, Method::POST, Method::PUT])
///     .allowed_headers(&["Content-Type", "Authorization", "X-Custom-Header"])
///     .allow_credentials(true)
///     .expose_headers(&["X-Total-Count"])
///     .max_age(3600)
///     .path_policy("/internal", RouteCorsPolicy::Disabled)
///     .build()
///     .unwrap();
/// ```
pub struct CorsMiddlewareBuilder {
    origins: Origins,
    allowed_headers: Vec<String>,
    allowed_methods: Vec<Method>,
    allow_credentials: bool,
    expose_headers: Vec<String>,
    max_age: Option<u32>,
    overrides: Vec<(String, RouteCorsPolicy)>,
}

impl CorsMiddlewareBuilder {
    /// Create a new builder with secure defaults
    ///
    /// Default configuration:
    /// - No origins allowed (empty list)
    /// - Common headers: `["Content-Type", "Authorization"]`
    /// - Common methods: `GET, POST, PUT, DELETE, OPTIONS`
    /// - Credentials: `false`
    /// - Exposed headers: empty
    /// - Max age: `None` (no preflight caching)
    #[must_use]
    pub fn new() -> Self {
        let defaults = CorsPolicy::default();
        Self {
            origins: Origins::List(vec![]),
            allowed_headers: defaults.allowed_headers,
            allowed_methods: defaults.allowed_methods,
            allow_credentials: false,
            expose_headers: vec![],
            max_age: None,
            overrides: vec![],
        }
    }

    /// Exact origins; `&["*"]` allows every origin.
    #[must_use]
    pub fn allowed_origins(mut self, origins: &[&str]) -> Self {
        self.origins = Origins::List(origins.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Origins matching any of the regular expressions.
    #[must_use]
    pub fn origin_patterns(mut self, patterns: &[&str]) -> Self {
        self.origins = Origins::Patterns(patterns.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Origins accepted by a custom predicate.
    #[must_use]
    pub fn origin_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.origins = Origins::Custom(Arc::new(validator));
        self
    }

    #[must_use]
    pub fn allowed_methods(mut self, methods: &[Method]) -> Self {
        self.allowed_methods = methods.to_vec();
        self
    }

    /// Use `&["*"]` to allow all headers.
    #[must_use]
    pub fn allowed_headers(mut self, headers: &[&str]) -> Self {
        self.allowed_headers = headers.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Cannot be combined with a wildcard origin.
    #[must_use]
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    #[must_use]
    pub fn expose_headers(mut self, headers: &[&str]) -> Self {
        self.expose_headers = headers.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Preflight cache duration in seconds.
    #[must_use]
    pub fn max_age(mut self, seconds: u32) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Policy for every path under `prefix` (longest prefix wins).
    #[must_use]
    pub fn path_policy(mut self, prefix: &str, policy: RouteCorsPolicy) -> Self {
        self.overrides.push((prefix.to_string(), policy));
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// [`CorsConfigError`] for wildcard or empty origins combined with
    /// credentials, malformed origins, bad regex patterns, or an override
    /// that turns on credentials for such an origin set.
    pub fn build(self) -> Result<CorsMiddleware, CorsConfigError> {
        let origin_validation = match self.origins {
            Origins::List(list) if list.iter().any(|o| o == "*") => OriginValidation::Wildcard,
            Origins::List(list) => {
                if let Some(bad) = list.iter().find(|o| !valid_origin(o)) {
                    return Err(CorsConfigError::InvalidOriginFormat {
                        origin: bad.clone(),
                    });
                }
                OriginValidation::Exact(list)
            }
            Origins::Patterns(patterns) => OriginValidation::Regex(
                patterns
                    .iter()
                    .map(|p| {
                        Regex::new(p).map_err(|e| CorsConfigError::InvalidPattern {
                            pattern: p.clone(),
                            reason: e.to_string(),
                        })
                    })
                    .collect::<Result<_, _>>()?,
            ),
            Origins::Custom(f) => OriginValidation::Custom(f),
        };

        let policy = CorsPolicy {
            origin_validation,
            allowed_headers: self.allowed_headers,
            allowed_methods: self.allowed_methods,
            allow_credentials: self.allow_credentials,
            expose_headers: self.expose_headers,
            max_age: self.max_age,
        };
        policy.validate()?;

        let mut overrides = PathRules::new();
        for (prefix, route_policy) in self.overrides {
            let resolved = match route_policy {
                RouteCorsPolicy::Inherit => Some(policy.clone()),
                RouteCorsPolicy::Disabled => None,
                RouteCorsPolicy::Custom(cfg) => Some(cfg.apply(&policy)?),
            };
            overrides = overrides.prefix(&prefix, resolved);
        }
        Ok(CorsMiddleware::from_parts(policy, overrides))
    }
}

impl Default for CorsMiddlewareBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `scheme://host[:port]` with no path.
fn valid_origin(origin: &str) -> bool {
    let Some((scheme, authority)) = origin.split_once("://") else {
        return false;
    };
    !scheme.is_empty()
        && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        && !authority.is_empty()
        && !authority.contains('/')
}
