//! Dispatcher core module - hot path for handler invocation.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use may::coroutine;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::binding::{BoundArgs, ParamSpec};
use crate::http::HandlerResponse;
use crate::router::RouteMatch;
use crate::server::{SendError, Session};
use crate::websocket::UpgradeHandler;

/// Error returned from inside a handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Explicit failure with a status the client should see.
    #[error("{message}")]
    Status { status: u16, message: String },
    /// The thunk asked for an argument the plan did not produce.
    #[error("handler argument {index} has an unexpected type")]
    BadArgument { index: usize },
    #[error(transparent)]
    Send(#[from] SendError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    #[must_use]
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        HandlerError::Status {
            status,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            HandlerError::Status { status, .. } => *status,
            _ => 500,
        }
    }
}

/// Failure while invoking a matched route.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Required parameter absent: the route is treated as not satisfied.
    #[error("missing required parameter `{name}`")]
    MissingParameter { name: String },
    /// A value was present but did not convert.
    #[error("parameter `{name}` value {value:?} is not a valid {expected}")]
    Conversion {
        name: String,
        value: String,
        expected: &'static str,
    },
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error("handler panicked: {0}")]
    Panic(String),
}

impl DispatchError {
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            DispatchError::MissingParameter { .. } => 404,
            DispatchError::Conversion { .. } | DispatchError::Panic(_) => 500,
            DispatchError::Handler(e) => e.status(),
        }
    }

    /// Message safe to show to the client.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            DispatchError::MissingParameter { .. } => "Not Found".to_string(),
            DispatchError::Handler(HandlerError::Status { message, .. }) => message.clone(),
            _ => "Internal Server Error".to_string(),
        }
    }
}

/// What a handler produced.
pub enum Reply {
    /// The handler already sent its response through the session (or has
    /// nothing to send).
    Sent,
    Response(HandlerResponse),
    /// Serialised with the session's JSON engine and sent as `200`.
    Value(Value),
    /// Work running on another coroutine; joined before replying.
    Task(coroutine::JoinHandle<Reply>),
    /// Switch protocols once the 101 response has been written.
    Upgrade(HandlerResponse, UpgradeHandler),
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Sent => f.write_str("Sent"),
            Reply::Response(r) => f.debug_tuple("Response").field(&r.status).finish(),
            Reply::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Reply::Task(_) => f.write_str("Task"),
            Reply::Upgrade(r, _) => f.debug_tuple("Upgrade").field(&r.status).finish(),
        }
    }
}

impl Reply {
    /// Run `work` on its own coroutine and reply with its result.
    ///
    /// # Errors
    ///
    /// Fails when the coroutine cannot be spawned.
    pub fn spawn<F, R>(work: F) -> Result<Reply, HandlerError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: IntoReply + 'static,
    {
        // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
        // The closure is Send + 'static and owns everything it touches.
        let handle = unsafe {
            coroutine::Builder::new()
                .stack_size(may::config().get_stack_size())
                .spawn(move || work().into_reply().unwrap_or_else(|e| {
                    Reply::Response(HandlerResponse::error(e.status(), &e.to_string()))
                }))
        }
        .map_err(|e| HandlerError::Other(anyhow::anyhow!("failed to spawn task: {e}")))?;
        Ok(Reply::Task(handle))
    }
}

/// Conversion of handler return values into a [`Reply`].
pub trait IntoReply {
    fn into_reply(self) -> Result<Reply, HandlerError>;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Ok(self)
    }
}

impl IntoReply for () {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Ok(Reply::Sent)
    }
}

impl IntoReply for HandlerResponse {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Ok(Reply::Response(self))
    }
}

impl IntoReply for Value {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Ok(Reply::Value(self))
    }
}

impl IntoReply for String {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Ok(Reply::Response(HandlerResponse::text(200, self)))
    }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Ok(Reply::Response(HandlerResponse::text(200, self)))
    }
}

impl<T: IntoReply, E: Into<HandlerError>> IntoReply for Result<T, E> {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        match self {
            Ok(value) => value.into_reply(),
            Err(e) => Err(e.into()),
        }
    }
}

/// Serialisable value returned as JSON.
#[derive(Debug, Clone)]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoReply for Json<T> {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        serde_json::to_value(&self.0)
            .map(Reply::Value)
            .map_err(|e| HandlerError::Other(e.into()))
    }
}

/// Compiled invocation thunk shared by every route of a handler.
pub type Thunk = Arc<dyn Fn(&mut Session, &mut BoundArgs) -> Result<Reply, HandlerError> + Send + Sync>;

/// A handler ready to be registered: name, declared parameters, thunk and
/// the routes it answers.
#[derive(Clone)]
pub struct HandlerDef {
    pub name: String,
    pub params: Vec<ParamSpec>,
    pub thunk: Thunk,
    pub routes: Vec<(String, String)>,
    pub absolute: bool,
}

impl fmt::Debug for HandlerDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDef")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("routes", &self.routes)
            .field("absolute", &self.absolute)
            .finish()
    }
}

impl HandlerDef {
    pub fn new<F>(name: &str, params: Vec<ParamSpec>, thunk: F) -> Self
    where
        F: Fn(&mut Session, &mut BoundArgs) -> Result<Reply, HandlerError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            params,
            thunk: Arc::new(thunk),
            routes: Vec::new(),
            absolute: false,
        }
    }

    /// Handler without declared parameters, built from a plain closure.
    pub fn from_fn<F, R>(name: &str, f: F) -> Self
    where
        F: Fn(&mut Session) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        Self::new(name, Vec::new(), move |session, _args| f(session).into_reply())
    }

    /// Add a route. `method` is a method name or `*` for any method.
    #[must_use]
    pub fn route(mut self, method: &str, path: &str) -> Self {
        self.routes.push((method.to_string(), path.to_string()));
        self
    }

    /// Ignore mount and controller prefixes for this handler's routes.
    #[must_use]
    pub fn absolute(mut self) -> Self {
        self.absolute = true;
        self
    }
}

/// Name and thunk of a registered handler.
pub struct HandlerCore {
    pub name: Arc<str>,
    pub thunk: Thunk,
}

impl fmt::Debug for HandlerCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerCore").field("name", &self.name).finish()
    }
}

/// Invokes matched routes: binds arguments, runs the thunk with panic
/// capture and turns the reply into at most one response.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher;

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Dispatcher
    }

    /// Invoke `route` for the request held by `session`.
    ///
    /// On success the session has been answered (or carries a pending
    /// upgrade). On error nothing has been sent unless the handler sent
    /// before failing; the caller maps the error with
    /// [`DispatchError::status`] when `!session.is_sent()`.
    ///
    /// # Errors
    ///
    /// See [`DispatchError`].
    pub fn invoke(&self, route: &RouteMatch, session: &mut Session) -> Result<(), DispatchError> {
        let handler = &route.route.handler;
        let request_id = session.request_id();
        let mut args = route.route.plan.bind(&route.path_params, session)?;

        debug!(
            request_id = %request_id,
            handler_name = %handler.name,
            path_params = ?route.path_params,
            "Handler execution start"
        );
        let started = Instant::now();
        let thunk = Arc::clone(&handler.thunk);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            thunk(session, &mut args)
        }));

        let result = match outcome {
            Ok(Ok(reply)) => self.complete(reply, session),
            Ok(Err(e)) => Err(DispatchError::Handler(e)),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    request_id = %request_id,
                    handler_name = %handler.name,
                    panic_message = %message,
                    "Handler panicked - CRITICAL"
                );
                Err(DispatchError::Panic(message))
            }
        };

        let execution_time_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => info!(
                request_id = %request_id,
                handler_name = %handler.name,
                execution_time_ms,
                "Handler execution complete"
            ),
            Err(e) => warn!(
                request_id = %request_id,
                handler_name = %handler.name,
                execution_time_ms,
                status = e.status(),
                error = %e,
                "Handler execution failed"
            ),
        }
        result
    }

    fn complete(&self, reply: Reply, session: &mut Session) -> Result<(), DispatchError> {
        match reply {
            Reply::Sent => {
                if !session.is_sent() {
                    session
                        .send(HandlerResponse::new(204))
                        .map_err(HandlerError::from)?;
                }
                Ok(())
            }
            Reply::Response(res) => Ok(session.send(res).map_err(HandlerError::from)?),
            Reply::Value(value) => Ok(session.send_json(200, &value).map_err(HandlerError::from)?),
            Reply::Task(handle) => match handle.join() {
                Ok(reply) => self.complete(reply, session),
                Err(panic) => Err(DispatchError::Panic(panic_message(panic.as_ref()))),
            },
            Reply::Upgrade(res, upgrade) => {
                session.send(res).map_err(HandlerError::from)?;
                session.set_upgrade(upgrade);
                Ok(())
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
