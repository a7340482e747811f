//! Router core module - hot path for request routing.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use smallvec::SmallVec;
use thiserror::Error;
use tracing::{debug, info};

use super::radix::RadixRouter;
use super::route::{classify, join_paths, param_names, MethodFilter, PatternKind, Route};
use crate::dispatcher::{BindingPlan, HandlerCore, HandlerDef, IntoReply};
use crate::server::Session;

/// Maximum number of path parameters before heap allocation.
pub const MAX_INLINE_PARAMS: usize = 8;

/// Path parameter storage.
///
/// Param names are `Arc<str>` shared with the route tree; values are per
/// request.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// Registration-time routing error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("invalid HTTP method `{0}`")]
    InvalidMethod(String),
    #[error("invalid route pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("default `{value}` for parameter `{param}` of handler `{handler}` does not convert")]
    InvalidDefault {
        handler: String,
        param: String,
        value: String,
    },
    #[error("route {method} {pattern} is registered twice")]
    Duplicate { method: String, pattern: String },
    #[error("handler `{0}` declares no routes")]
    NoRoutes(String),
}

/// Result of successfully matching a request path to a route
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    /// Path parameters extracted from the URL (e.g., `{id}` → `("id", "123")`)
    pub path_params: ParamVec,
}

impl RouteMatch {
    /// Get a path parameter by name
    ///
    /// Uses "last write wins" semantics: if duplicate parameter names exist
    /// at different path depths, returns the last occurrence.
    #[inline]
    #[must_use]
    pub fn get_path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn handler_name(&self) -> &str {
        self.route.handler_name()
    }
}

/// Outcome of [`Router::resolve`].
#[derive(Debug)]
pub enum Resolution {
    Matched(RouteMatch),
    /// The path exists, but not for this method. Carries the `Allow` list.
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

/// Router behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterOptions {
    /// When false only literal routes resolve; `{param}`, `{*tail}` and regex
    /// routes answer 404.
    pub pattern_matching: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            pattern_matching: true,
        }
    }
}

/// A group of handlers sharing a path prefix.
pub trait Controller {
    /// Type-level prefix placed after the mount prefix.
    fn prefix(&self) -> &str {
        ""
    }

    fn routes(&self, group: &mut RouteGroup);
}

/// Collects a controller's handlers during [`RouterBuilder::mount`].
#[derive(Debug, Default)]
pub struct RouteGroup {
    handlers: Vec<HandlerDef>,
}

impl RouteGroup {
    pub fn handler(&mut self, def: HandlerDef) -> &mut Self {
        self.handlers.push(def);
        self
    }

    /// Register a closure without declared parameters.
    pub fn route<F, R>(&mut self, method: &str, path: &str, f: F) -> &mut Self
    where
        F: Fn(&mut Session) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        let name = format!("{method} {path}");
        self.handler(HandlerDef::from_fn(&name, f).route(method, path))
    }
}

struct Pending {
    prefix: String,
    def: HandlerDef,
}

/// Builds an immutable [`Router`].
///
/// Registration never fails eagerly; every problem is reported by
/// [`RouterBuilder::build`].
pub struct RouterBuilder {
    options: RouterOptions,
    pending: Vec<Pending>,
}

impl RouterBuilder {
    /// Register a closure without declared parameters.
    #[must_use]
    pub fn route<F, R>(self, method: &str, path: &str, f: F) -> Self
    where
        F: Fn(&mut Session) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        let name = format!("{method} {path}");
        self.handler(HandlerDef::from_fn(&name, f).route(method, path))
    }

    /// Register a compiled handler (usually from `#[handler]`).
    #[must_use]
    pub fn handler(mut self, def: HandlerDef) -> Self {
        self.pending.push(Pending {
            prefix: String::new(),
            def,
        });
        self
    }

    /// Register every handler of `controller` under `prefix`.
    #[must_use]
    pub fn mount<C: Controller + ?Sized>(mut self, prefix: &str, controller: &C) -> Self {
        let mut group = RouteGroup::default();
        controller.routes(&mut group);
        let prefix = join_paths(&[prefix, controller.prefix()]);
        for def in group.handlers {
            self.pending.push(Pending {
                prefix: prefix.clone(),
                def,
            });
        }
        self
    }

    /// Compile all registrations.
    ///
    /// # Errors
    ///
    /// The first [`RouteError`] found.
    pub fn build(self) -> Result<Router, RouteError> {
        let mut router = Router {
            options: self.options,
            routes: Vec::new(),
            literal: HashMap::new(),
            radix: RadixRouter::new(),
            regex: Vec::new(),
            prefix: Vec::new(),
        };

        for Pending { prefix, def } in self.pending {
            if def.routes.is_empty() {
                return Err(RouteError::NoRoutes(def.name));
            }
            let core = Arc::new(HandlerCore {
                name: Arc::from(def.name.as_str()),
                thunk: Arc::clone(&def.thunk),
            });
            // Each route attribute is an independent registration sharing the thunk.
            for (method, path) in &def.routes {
                let method = MethodFilter::parse(method)?;
                let pattern = if path.starts_with('^') {
                    path.clone()
                } else if def.absolute {
                    join_paths(&[path])
                } else {
                    join_paths(&[&prefix, path])
                };
                let kind = classify(&pattern)?;
                let names = param_names(&pattern, &kind);
                let plan = BindingPlan::compile(&def.name, &def.params, &names)?;
                router.insert(Route {
                    method,
                    pattern,
                    kind,
                    handler: Arc::clone(&core),
                    plan,
                })?;
            }
        }

        // Longest prefix first; the sort is stable so equal prefixes keep
        // registration order.
        router.prefix.sort_by(|a, b| prefix_len(b).cmp(&prefix_len(a)));

        let routes_summary: Vec<String> = router
            .routes
            .iter()
            .take(10)
            .map(|r| format!("{} {}", r.method, r.pattern))
            .collect();
        info!(
            routes_count = router.routes.len(),
            pattern_matching = router.options.pattern_matching,
            routes_summary = ?routes_summary,
            "Routing table loaded"
        );
        Ok(router)
    }
}

fn prefix_len(route: &Arc<Route>) -> usize {
    match &route.kind {
        PatternKind::Prefix { prefix, .. } => prefix.len(),
        _ => 0,
    }
}

/// Immutable route table.
///
/// Resolution order: literal paths first, then (when pattern matching is
/// on) `{param}` routes through the radix tree, regex routes in registration
/// order, and finally `{*tail}` prefix routes with the longest prefix
/// winning.
pub struct Router {
    options: RouterOptions,
    routes: Vec<Arc<Route>>,
    literal: HashMap<String, Vec<Arc<Route>>>,
    radix: RadixRouter,
    regex: Vec<Arc<Route>>,
    prefix: Vec<Arc<Route>>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("options", &self.options)
            .field("routes", &self.routes.len())
            .finish()
    }
}

impl Router {
    #[must_use]
    pub fn builder(options: RouterOptions) -> RouterBuilder {
        RouterBuilder {
            options,
            pending: Vec::new(),
        }
    }

    fn insert(&mut self, route: Route) -> Result<(), RouteError> {
        let duplicate = self
            .routes
            .iter()
            .any(|r| r.method == route.method && r.pattern == route.pattern);
        if duplicate {
            return Err(RouteError::Duplicate {
                method: route.method.to_string(),
                pattern: route.pattern,
            });
        }
        let route = Arc::new(route);
        match route.kind {
            PatternKind::Literal => self
                .literal
                .entry(route.pattern.clone())
                .or_default()
                .push(Arc::clone(&route)),
            PatternKind::Param => self.radix.insert(Arc::clone(&route)),
            PatternKind::Regex(_) => self.regex.push(Arc::clone(&route)),
            PatternKind::Prefix { .. } => self.prefix.push(Arc::clone(&route)),
        }
        self.routes.push(route);
        Ok(())
    }

    #[must_use]
    pub fn options(&self) -> RouterOptions {
        self.options
    }

    /// All routes in registration order.
    pub fn routes(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.routes.iter()
    }

    /// Print all registered routes to stdout
    pub fn dump_routes(&self) {
        println!("[routes] count={}", self.routes.len());
        for route in &self.routes {
            println!(
                "[route] {} {} -> {}",
                route.method,
                route.pattern,
                route.handler_name()
            );
        }
    }

    /// Resolve `method` + `path`.
    ///
    /// `HEAD` falls back to a `GET` route when no `HEAD` route matches.
    #[must_use]
    pub fn resolve(&self, method: &Method, path: &str) -> Resolution {
        let mut allowed = Vec::new();
        if let Some(found) = self.find(method, path, &mut allowed) {
            debug!(
                method = %method,
                path = %path,
                handler_name = %found.route.handler_name(),
                route_pattern = %found.route.pattern,
                "Route matched"
            );
            return Resolution::Matched(found);
        }
        if *method == Method::HEAD {
            if let Some(found) = self.find(&Method::GET, path, &mut Vec::new()) {
                return Resolution::Matched(found);
            }
        }

        if allowed.is_empty() {
            debug!(method = %method, path = %path, "No route matched");
            return Resolution::NotFound;
        }
        let mut methods: Vec<Method> = Vec::new();
        for filter in allowed {
            if let MethodFilter::Exact(m) = filter {
                if !methods.contains(&m) {
                    methods.push(m);
                }
            }
        }
        if methods.contains(&Method::GET) && !methods.contains(&Method::HEAD) {
            methods.push(Method::HEAD);
        }
        debug!(method = %method, path = %path, allowed = ?methods, "Method not allowed");
        Resolution::MethodNotAllowed(methods)
    }

    fn find(&self, method: &Method, path: &str, allowed: &mut Vec<MethodFilter>) -> Option<RouteMatch> {
        let normalized = if path.len() > 1 {
            path.trim_end_matches('/')
        } else {
            path
        };
        let normalized = if normalized.is_empty() { "/" } else { normalized };

        if let Some(candidates) = self.literal.get(normalized) {
            if let Some(route) = pick(candidates, method, allowed) {
                return Some(RouteMatch {
                    route: Arc::clone(route),
                    path_params: ParamVec::new(),
                });
            }
        }

        if !self.options.pattern_matching {
            return None;
        }

        if !self.radix.is_empty() {
            if let Some((route, path_params)) = self.radix.route(method, path, allowed) {
                return Some(RouteMatch { route, path_params });
            }
        }

        // First registered regex wins.
        for route in &self.regex {
            let PatternKind::Regex(re) = &route.kind else {
                continue;
            };
            let Some(caps) = re.captures(path) else {
                continue;
            };
            if !route.method.matches(method) {
                allowed.push(route.method.clone());
                continue;
            }
            let mut path_params = ParamVec::new();
            for name in re.capture_names().flatten() {
                if let Some(m) = caps.name(name) {
                    path_params.push((Arc::from(name), m.as_str().to_string()));
                }
            }
            return Some(RouteMatch {
                route: Arc::clone(route),
                path_params,
            });
        }

        // Sorted longest prefix first.
        for route in &self.prefix {
            let PatternKind::Prefix { prefix, param } = &route.kind else {
                continue;
            };
            let Some(rest) = strip_path_prefix(normalized, prefix) else {
                continue;
            };
            if !route.method.matches(method) {
                allowed.push(route.method.clone());
                continue;
            }
            let mut path_params = ParamVec::new();
            path_params.push((Arc::from(param.as_str()), rest.to_string()));
            return Some(RouteMatch {
                route: Arc::clone(route),
                path_params,
            });
        }
        None
    }
}

fn pick<'a>(
    candidates: &'a [Arc<Route>],
    method: &Method,
    allowed: &mut Vec<MethodFilter>,
) -> Option<&'a Arc<Route>> {
    let exact = candidates
        .iter()
        .find(|r| matches!(&r.method, MethodFilter::Exact(m) if m == method));
    let found = exact.or_else(|| candidates.iter().find(|r| r.method == MethodFilter::Any));
    if found.is_none() {
        allowed.extend(candidates.iter().map(|r| r.method.clone()));
    }
    found
}

/// Remainder of `path` under `prefix`, only at a segment boundary.
fn strip_path_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix == "/" {
        return Some(path.trim_start_matches('/'));
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}
