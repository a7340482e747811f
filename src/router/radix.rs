//! Radix tree for parameterised route matching.
//!
//! Each node represents one path segment. Static segments match exactly and
//! are tried first; `{name}` segments match any single segment. Routes live
//! at terminal nodes as a list of method filters in registration order, so
//! the first registered route for a method wins.
//!
//! Lookup cost is proportional to the number of segments in the path, not to
//! the number of registered routes.

use std::sync::Arc;

use http::Method;

use super::core::ParamVec;
use super::route::{MethodFilter, Route};

#[derive(Clone, Default)]
struct RadixNode {
    /// The path segment this node represents (without leading /)
    segment: Arc<str>,
    /// Routes terminating at this node, in registration order.
    routes: Vec<Arc<Route>>,
    /// Parameter name if this segment is a path parameter (e.g., "{id}" -> Some("id"))
    param_name: Option<Arc<str>>,
    children: Vec<RadixNode>,
    /// Parameter children; several may coexist at the same depth with
    /// different names (`/users/{id}/posts` and `/users/{user_id}/comments`).
    param_children: Vec<RadixNode>,
}

impl RadixNode {
    fn new(segment: &str) -> Self {
        Self {
            segment: Arc::from(segment),
            ..Self::default()
        }
    }

    fn new_param(param_name: &str) -> Self {
        Self {
            segment: Arc::from(""),
            param_name: Some(Arc::from(param_name)),
            ..Self::default()
        }
    }

    fn insert(&mut self, segments: &[&str], route: Arc<Route>) {
        let Some((&segment, remaining)) = segments.split_first() else {
            self.routes.push(route);
            return;
        };

        if let Some(param_name) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            if let Some(child) = self
                .param_children
                .iter_mut()
                .find(|c| c.param_name.as_deref() == Some(param_name))
            {
                child.insert(remaining, route);
                return;
            }
            let mut child = RadixNode::new_param(param_name);
            child.insert(remaining, route);
            self.param_children.push(child);
            return;
        }

        if let Some(child) = self.children.iter_mut().find(|c| &*c.segment == segment) {
            child.insert(remaining, route);
            return;
        }
        let mut child = RadixNode::new(segment);
        child.insert(remaining, route);
        self.children.push(child);
    }

    fn search(
        &self,
        segments: &[&str],
        method: &Method,
        params: &mut ParamVec,
        allowed: &mut Vec<MethodFilter>,
    ) -> Option<Arc<Route>> {
        let Some((&segment, remaining)) = segments.split_first() else {
            if let Some(route) = self.routes.iter().find(|r| r.method.matches(method)) {
                return Some(Arc::clone(route));
            }
            allowed.extend(self.routes.iter().map(|r| r.method.clone()));
            return None;
        };

        // Static children first
        for child in &self.children {
            if &*child.segment == segment {
                if let Some(route) = child.search(remaining, method, params, allowed) {
                    return Some(route);
                }
            }
        }

        for param_child in &self.param_children {
            if let Some(ref name) = param_child.param_name {
                params.push((Arc::clone(name), segment.to_string()));
                if let Some(route) = param_child.search(remaining, method, params, allowed) {
                    return Some(route);
                }
                // Backtrack
                params.pop();
            }
        }

        None
    }
}

/// Radix tree over parameterised routes.
#[derive(Clone, Default)]
pub struct RadixRouter {
    root: RadixNode,
    len: usize,
}

impl RadixRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, route: Arc<Route>) {
        let pattern = route.pattern.clone();
        let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
        self.root.insert(&segments, route);
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Find the route for `method` + `path`.
    ///
    /// When the path exists only under other methods, their filters are
    /// appended to `allowed`.
    pub fn route(
        &self,
        method: &Method,
        path: &str,
        allowed: &mut Vec<MethodFilter>,
    ) -> Option<(Arc<Route>, ParamVec)> {
        let segments: smallvec::SmallVec<[&str; 16]> =
            path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = ParamVec::new();
        let route = self.root.search(&segments, method, &mut params, allowed)?;
        Some((route, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{BindingPlan, BoundArgs, HandlerCore, HandlerError, Reply};
    use crate::router::route::PatternKind;
    use crate::server::Session;

    fn route(method: Method, pattern: &str, handler: &str) -> Arc<Route> {
        Arc::new(Route {
            method: MethodFilter::Exact(method),
            pattern: pattern.to_string(),
            kind: PatternKind::Param,
            handler: Arc::new(HandlerCore {
                name: Arc::from(handler),
                thunk: Arc::new(|_: &mut Session, _: &mut BoundArgs| {
                    Ok::<_, HandlerError>(Reply::Sent)
                }),
            }),
            plan: BindingPlan::default(),
        })
    }

    fn tree(routes: Vec<Arc<Route>>) -> RadixRouter {
        let mut r = RadixRouter::new();
        for route in routes {
            r.insert(route);
        }
        r
    }

    fn param<'a>(params: &'a ParamVec, name: &str) -> Option<&'a str> {
        params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_radix_router_with_parameter() {
        let router = tree(vec![route(Method::GET, "/users/{id}", "get_user")]);
        let (route, params) = router.route(&Method::GET, "/users/123", &mut Vec::new()).unwrap();
        assert_eq!(route.handler_name(), "get_user");
        assert_eq!(param(&params, "id"), Some("123"));
    }

    #[test]
    fn test_radix_router_method_filtering() {
        let router = tree(vec![
            route(Method::GET, "/items/{id}", "get_item"),
            route(Method::POST, "/items/{id}", "update_item"),
        ]);
        let mut allowed = Vec::new();
        assert_eq!(
            router.route(&Method::POST, "/items/1", &mut allowed).unwrap().0.handler_name(),
            "update_item"
        );
        assert!(router.route(&Method::PUT, "/items/1", &mut allowed).is_none());
        assert_eq!(
            allowed,
            vec![MethodFilter::Exact(Method::GET), MethodFilter::Exact(Method::POST)]
        );
    }

    #[test]
    fn test_radix_router_static_beats_param() {
        let router = tree(vec![
            route(Method::GET, "/users/{id}", "get_user"),
            route(Method::GET, "/users/{id}/posts/me", "my_posts"),
            route(Method::GET, "/users/{id}/posts/{post}", "get_post"),
        ]);
        let (r, _) = router.route(&Method::GET, "/users/1/posts/me", &mut Vec::new()).unwrap();
        assert_eq!(r.handler_name(), "my_posts");
        let (r, params) = router.route(&Method::GET, "/users/1/posts/9", &mut Vec::new()).unwrap();
        assert_eq!(r.handler_name(), "get_post");
        assert_eq!(param(&params, "post"), Some("9"));
    }

    #[test]
    fn test_radix_router_different_param_names_same_position() {
        let router = tree(vec![
            route(Method::GET, "/users/{user_id}/posts", "get_user_posts"),
            route(Method::GET, "/users/{id}/comments", "get_user_comments"),
        ]);

        let (r1, p1) = router.route(&Method::GET, "/users/123/posts", &mut Vec::new()).unwrap();
        assert_eq!(r1.handler_name(), "get_user_posts");
        assert_eq!(param(&p1, "user_id"), Some("123"));
        assert!(param(&p1, "id").is_none());

        let (r2, p2) = router.route(&Method::GET, "/users/456/comments", &mut Vec::new()).unwrap();
        assert_eq!(r2.handler_name(), "get_user_comments");
        assert_eq!(param(&p2, "id"), Some("456"));
        assert!(param(&p2, "user_id").is_none());
    }
}
