use http::Method;

use super::{Controller, Resolution, RouteError, RouteGroup, Router, RouterOptions};
use crate::dispatcher::{HandlerDef, ParamSpec};

fn matched(router: &Router, method: Method, path: &str) -> Option<(String, Vec<(String, String)>)> {
    match router.resolve(&method, path) {
        Resolution::Matched(m) => Some((
            m.handler_name().to_string(),
            m.path_params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )),
        _ => None,
    }
}

fn named(name: &str, method: &str, path: &str) -> HandlerDef {
    HandlerDef::from_fn(name, |_session| ()).route(method, path)
}

#[test]
fn test_literal_route() {
    let router = Router::builder(RouterOptions::default())
        .handler(named("health", "GET", "/health"))
        .build()
        .unwrap();
    assert_eq!(matched(&router, Method::GET, "/health").unwrap().0, "health");
    assert_eq!(matched(&router, Method::GET, "/health/").unwrap().0, "health");
    assert!(matches!(
        router.resolve(&Method::GET, "/other"),
        Resolution::NotFound
    ));
}

#[test]
fn test_literal_beats_param() {
    let router = Router::builder(RouterOptions::default())
        .handler(named("by_id", "GET", "/users/{id}"))
        .handler(named("me", "GET", "/users/me"))
        .build()
        .unwrap();
    assert_eq!(matched(&router, Method::GET, "/users/me").unwrap().0, "me");
    let (name, params) = matched(&router, Method::GET, "/users/42").unwrap();
    assert_eq!(name, "by_id");
    assert_eq!(params, vec![("id".to_string(), "42".to_string())]);
}

#[test]
fn test_method_not_allowed_lists_methods() {
    let router = Router::builder(RouterOptions::default())
        .handler(named("get_item", "GET", "/items/{id}"))
        .handler(named("put_item", "PUT", "/items/{id}"))
        .build()
        .unwrap();
    match router.resolve(&Method::DELETE, "/items/1") {
        Resolution::MethodNotAllowed(allowed) => {
            assert_eq!(allowed, vec![Method::GET, Method::PUT, Method::HEAD]);
        }
        other => panic!("expected 405, got {other:?}"),
    }
}

#[test]
fn test_head_falls_back_to_get() {
    let router = Router::builder(RouterOptions::default())
        .handler(named("index", "GET", "/"))
        .build()
        .unwrap();
    assert_eq!(matched(&router, Method::HEAD, "/").unwrap().0, "index");
}

#[test]
fn test_any_method() {
    let router = Router::builder(RouterOptions::default())
        .handler(named("anything", "*", "/echo"))
        .build()
        .unwrap();
    assert!(matched(&router, Method::PATCH, "/echo").is_some());
    assert!(matched(&router, Method::DELETE, "/echo").is_some());
}

#[test]
fn test_prefix_longest_wins() {
    let router = Router::builder(RouterOptions::default())
        .handler(named("api", "GET", "/api/{*rest}"))
        .handler(named("admin", "GET", "/api/admin/{*rest}"))
        .build()
        .unwrap();
    let (name, params) = matched(&router, Method::GET, "/api/admin/x").unwrap();
    assert_eq!(name, "admin");
    assert_eq!(params, vec![("rest".to_string(), "x".to_string())]);
    assert_eq!(matched(&router, Method::GET, "/api/other").unwrap().0, "api");
    // Prefix rules only match at segment boundaries.
    assert_eq!(matched(&router, Method::GET, "/api/administrator").unwrap().0, "api");
    assert!(matched(&router, Method::GET, "/apix").is_none());
}

#[test]
fn test_regex_first_registered_wins() {
    let router = Router::builder(RouterOptions::default())
        .handler(named("versioned", "GET", r"^/v(?P<ver>\d+)/.*$"))
        .handler(named("v1_only", "GET", r"^/v1/.*$"))
        .build()
        .unwrap();
    let (name, params) = matched(&router, Method::GET, "/v1/users").unwrap();
    assert_eq!(name, "versioned");
    assert_eq!(params, vec![("ver".to_string(), "1".to_string())]);
}

#[test]
fn test_pattern_matching_disabled() {
    let router = Router::builder(RouterOptions {
        pattern_matching: false,
    })
    .handler(named("literal", "GET", "/users/all"))
    .handler(named("param", "GET", "/users/{id}"))
    .handler(named("tail", "GET", "/files/{*rest}"))
    .build()
    .unwrap();
    assert!(matched(&router, Method::GET, "/users/all").is_some());
    assert!(matches!(
        router.resolve(&Method::GET, "/users/7"),
        Resolution::NotFound
    ));
    assert!(matches!(
        router.resolve(&Method::GET, "/files/a"),
        Resolution::NotFound
    ));
}

#[test]
fn test_multiple_routes_share_handler() {
    let def = HandlerDef::from_fn("list", |_session| ())
        .route("GET", "/pets")
        .route("GET", "/animals");
    let router = Router::builder(RouterOptions::default())
        .handler(def)
        .build()
        .unwrap();
    assert_eq!(router.routes().count(), 2);
    assert_eq!(matched(&router, Method::GET, "/pets").unwrap().0, "list");
    assert_eq!(matched(&router, Method::GET, "/animals").unwrap().0, "list");
}

struct Pets;

impl Controller for Pets {
    fn prefix(&self) -> &str {
        "/pets/"
    }

    fn routes(&self, group: &mut RouteGroup) {
        group
            .handler(named("list_pets", "GET", ""))
            .handler(named("get_pet", "GET", "{id}"))
            .handler(named("status", "GET", "/status").absolute());
    }
}

#[test]
fn test_mount_joins_prefixes() {
    let router = Router::builder(RouterOptions::default())
        .mount("/api//", &Pets)
        .build()
        .unwrap();
    let patterns: Vec<&str> = router.routes().map(|r| r.pattern.as_str()).collect();
    assert_eq!(patterns, vec!["/api/pets", "/api/pets/{id}", "/status"]);
    assert_eq!(matched(&router, Method::GET, "/api/pets/3").unwrap().0, "get_pet");
    assert_eq!(matched(&router, Method::GET, "/status").unwrap().0, "status");
}

#[test]
fn test_build_errors() {
    let dup = Router::builder(RouterOptions::default())
        .handler(named("a", "GET", "/x"))
        .handler(named("b", "GET", "/x/"))
        .build();
    assert!(matches!(dup, Err(RouteError::Duplicate { .. })));

    let bad_method = Router::builder(RouterOptions::default())
        .handler(named("a", "G E T", "/x"))
        .build();
    assert!(matches!(bad_method, Err(RouteError::InvalidMethod(_))));

    let bad_default = Router::builder(RouterOptions::default())
        .handler(
            HandlerDef::new(
                "limited",
                vec![ParamSpec::of::<u32>("limit").with_default("many")],
                |_s, _a| Ok(crate::dispatcher::Reply::Sent),
            )
            .route("GET", "/limited"),
        )
        .build();
    assert!(matches!(bad_default, Err(RouteError::InvalidDefault { .. })));

    let no_routes = Router::builder(RouterOptions::default())
        .handler(HandlerDef::from_fn("orphan", |_session| ()))
        .build();
    assert!(matches!(no_routes, Err(RouteError::NoRoutes(_))));
}
