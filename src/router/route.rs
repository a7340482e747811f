use std::fmt;
use std::sync::Arc;

use http::Method;
use regex::Regex;

use super::RouteError;
use crate::dispatcher::{BindingPlan, HandlerCore};

/// Which methods a route answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodFilter {
    /// Registered with `*`.
    Any,
    Exact(Method),
}

impl MethodFilter {
    /// Parse a method name; `*` means any method.
    ///
    /// # Errors
    ///
    /// [`RouteError::InvalidMethod`] for tokens that are not valid methods.
    pub fn parse(raw: &str) -> Result<Self, RouteError> {
        if raw == "*" {
            return Ok(MethodFilter::Any);
        }
        Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
            .map(MethodFilter::Exact)
            .map_err(|_| RouteError::InvalidMethod(raw.to_string()))
    }

    #[must_use]
    pub fn matches(&self, method: &Method) -> bool {
        match self {
            MethodFilter::Any => true,
            MethodFilter::Exact(m) => m == method,
        }
    }
}

impl fmt::Display for MethodFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodFilter::Any => f.write_str("*"),
            MethodFilter::Exact(m) => write!(f, "{m}"),
        }
    }
}

/// How a route's path is matched.
#[derive(Debug, Clone)]
pub enum PatternKind {
    /// Plain path compared for equality.
    Literal,
    /// Path with `{name}` segments, matched through the radix tree.
    Param,
    /// Path ending in `{*name}`: everything under `prefix` matches and the
    /// remainder is bound to `param`.
    Prefix { prefix: String, param: String },
    /// Full-path regular expression; named groups become path parameters.
    Regex(Regex),
}

/// One registered (method, pattern) → handler binding.
///
/// Immutable once the router is built.
#[derive(Debug)]
pub struct Route {
    pub method: MethodFilter,
    /// Full pattern after prefix joining.
    pub pattern: String,
    pub kind: PatternKind,
    pub handler: Arc<HandlerCore>,
    pub plan: BindingPlan,
}

impl Route {
    #[must_use]
    pub fn handler_name(&self) -> &str {
        &self.handler.name
    }

    /// Names of the path parameters this pattern can bind.
    #[must_use]
    pub fn path_param_names(&self) -> Vec<String> {
        param_names(&self.pattern, &self.kind)
    }
}

/// Classify a pattern.
///
/// Patterns starting with `^` are regular expressions; anything else is a
/// path template.
pub(crate) fn classify(pattern: &str) -> Result<PatternKind, RouteError> {
    if pattern.starts_with('^') {
        let re = Regex::new(pattern).map_err(|e| RouteError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        return Ok(PatternKind::Regex(re));
    }

    let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let mut has_param = false;
    for (i, seg) in segments.iter().enumerate() {
        let Some(inner) = seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')) else {
            if seg.contains('{') || seg.contains('}') {
                return Err(RouteError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: format!("segment `{seg}` mixes text and a placeholder"),
                });
            }
            continue;
        };
        if let Some(tail) = inner.strip_prefix('*') {
            if i + 1 != segments.len() || tail.is_empty() {
                return Err(RouteError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: "`{*name}` must be the last segment".to_string(),
                });
            }
            if has_param {
                return Err(RouteError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: "`{*name}` cannot follow `{name}` segments".to_string(),
                });
            }
            let prefix = join_paths(&[&segments[..i].join("/")]);
            return Ok(PatternKind::Prefix {
                prefix,
                param: tail.to_string(),
            });
        }
        if inner.is_empty() {
            return Err(RouteError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "empty placeholder".to_string(),
            });
        }
        has_param = true;
    }
    Ok(if has_param {
        PatternKind::Param
    } else {
        PatternKind::Literal
    })
}

pub(crate) fn param_names(pattern: &str, kind: &PatternKind) -> Vec<String> {
    match kind {
        PatternKind::Literal => Vec::new(),
        PatternKind::Param => pattern
            .split('/')
            .filter_map(|s| s.strip_prefix('{').and_then(|s| s.strip_suffix('}')))
            .map(str::to_string)
            .collect(),
        PatternKind::Prefix { param, .. } => vec![param.clone()],
        PatternKind::Regex(re) => re.capture_names().flatten().map(str::to_string).collect(),
    }
}

/// Join path pieces with exactly one `/` between non-empty segments.
///
/// ```
/// use brrtserver::router::join_paths;
///
/// assert_eq!(join_paths(&["/api/", "users", "/{id}/"]), "/api/users/{id}");
/// assert_eq!(join_paths(&["", "/"]), "/");
/// ```
#[must_use]
pub fn join_paths(parts: &[&str]) -> String {
    let mut out = String::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
    for part in parts {
        for seg in part.split('/').filter(|s| !s.is_empty()) {
            out.push('/');
            out.push_str(seg);
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert!(matches!(classify("/a/b"), Ok(PatternKind::Literal)));
        assert!(matches!(classify("/user/{login}"), Ok(PatternKind::Param)));
        match classify("/files/{*rest}") {
            Ok(PatternKind::Prefix { prefix, param }) => {
                assert_eq!(prefix, "/files");
                assert_eq!(param, "rest");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(classify("^/v(?P<ver>\\d+)/.*$"), Ok(PatternKind::Regex(_))));
        assert!(classify("/files/{*rest}/more").is_err());
        assert!(classify("/a/x{id}").is_err());
        assert!(classify("^/(").is_err());
    }

    #[test]
    fn test_method_filter() {
        assert_eq!(MethodFilter::parse("*").unwrap(), MethodFilter::Any);
        assert_eq!(MethodFilter::parse("get").unwrap(), MethodFilter::Exact(Method::GET));
        assert!(MethodFilter::parse("GE T").is_err());
        assert!(MethodFilter::Any.matches(&Method::DELETE));
    }

    #[test]
    fn test_param_names_for_regex() {
        let kind = classify("^/v(?P<ver>\\d+)/(?P<rest>.*)$").unwrap();
        assert_eq!(param_names("", &kind), vec!["ver", "rest"]);
    }
}
