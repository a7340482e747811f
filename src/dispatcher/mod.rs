//! # Dispatcher Module
//!
//! The dispatcher turns a matched route into a handler call.
//!
//! ## Overview
//!
//! Handler metadata is resolved once, at registration: each handler is a
//! [`HandlerDef`] holding its ordered parameter declarations and a thunk. When
//! the router is built, the declarations are compiled against every route's
//! path placeholders into a [`BindingPlan`]. Per request the dispatcher only
//! interprets that plan, converts raw strings into [`ArgValue`]s and calls the
//! thunk.
//!
//! ## Handler Registration
//!
//! ```rust,ignore
//! use brrtserver::dispatcher::Json;
//! use brrtserver::handler;
//!
//! #[handler(get("/user/{login}/{year}"), defaults(limit = 10))]
//! fn get_user(login: String, year: i32, limit: u32) -> Json<serde_json::Value> {
//!     Json(serde_json::json!({ "login": login, "year": year, "limit": limit }))
//! }
//!
//! let router = Router::builder(RouterOptions::default())
//!     .handler(get_user_handler())
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! - A required parameter that is absent yields 404: the route is not satisfied.
//! - A parameter that is present but does not convert yields 500.
//! - Handler panics are caught and return 500 if nothing was sent yet.

mod args;
mod binding;
mod core;

pub use args::{ArgValue, FromArg, ParamKind};
pub use binding::{Binding, BindingPlan, BoundArgs, ParamSource, ParamSpec};
pub use core::{
    DispatchError, Dispatcher, HandlerCore, HandlerDef, HandlerError, IntoReply, Json, Reply,
    Thunk,
};
