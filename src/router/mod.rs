//! # Router Module
//!
//! Maps a method and a path onto a registered handler.
//!
//! ## Overview
//!
//! Routes are registered through [`RouterBuilder`], either one by one or as a
//! [`Controller`] mounted under a prefix, and compiled by
//! [`RouterBuilder::build`] into an immutable [`Router`]. Nothing can be added
//! once serving starts.
//!
//! ## Pattern kinds
//!
//! | Pattern                    | Matching                                  |
//! |----------------------------|-------------------------------------------|
//! | `/health`                  | exact path                                |
//! | `/user/{login}/{year}`     | radix tree, one segment per placeholder   |
//! | `/files/{*rest}`           | prefix rule, longest prefix wins          |
//! | `^/v(?P<ver>\d+)/.*$`      | regex, first registered match wins        |
//!
//! Literal routes always take priority. The other kinds only resolve when
//! [`RouterOptions::pattern_matching`] is on.
//!
//! ## Example
//!
//! ```rust
//! use brrtserver::router::{Resolution, Router, RouterOptions};
//! use http::Method;
//!
//! let router = Router::builder(RouterOptions::default())
//!     .route("GET", "/health", |_session| "ok")
//!     .route("*", "/files/{*rest}", |_session| "file")
//!     .build()
//!     .unwrap();
//!
//! assert!(matches!(router.resolve(&Method::GET, "/health"), Resolution::Matched(_)));
//! assert!(matches!(router.resolve(&Method::POST, "/health"), Resolution::MethodNotAllowed(_)));
//! match router.resolve(&Method::GET, "/files/a/b.txt") {
//!     Resolution::Matched(m) => assert_eq!(m.get_path_param("rest"), Some("a/b.txt")),
//!     other => panic!("{other:?}"),
//! }
//! ```

mod core;
mod radix;
mod route;
#[cfg(test)]
mod tests;

pub use core::{
    Controller, ParamVec, Resolution, RouteError, RouteGroup, RouteMatch, Router, RouterBuilder,
    RouterOptions, MAX_INLINE_PARAMS,
};
pub use route::{join_paths, MethodFilter, PatternKind, Route};
