//! Connection handling: the per-request [`Session`], the [`App`] that
//! routes requests through middleware, and the TCP [`HttpServer`].

mod connection;
mod http_server;
mod service;
mod session;

pub use connection::serve_connection;
pub use http_server::{HttpServer, ServerHandle};
pub use service::App;
pub use session::{Extensions, SendError, Session};
