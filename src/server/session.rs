use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::http::multipart::{self, FormData, MultipartLimits};
use crate::http::{parse_query, HandlerResponse, Request};
use crate::ids::RequestId;
use crate::json::{self, JsonEngine, JsonError, SerdeJsonEngine};
use crate::websocket::UpgradeHandler;

/// Failure to put a response into the session.
#[derive(Debug, Error)]
pub enum SendError {
    /// A response was already sent for this request.
    #[error("a response has already been sent for this request")]
    AlreadySent,
    #[error(transparent)]
    Json(#[from] JsonError),
}

/// Typed per-request values shared between middleware and handlers.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl Extensions {
    /// Insert a value, returning the previous one of the same type.
    pub fn insert<T: Send + 'static>(&mut self, value: T) -> Option<T> {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast().ok().map(|b| *b))
    }

    #[must_use]
    pub fn get<T: Send + 'static>(&self) -> Option<&T> {
        self.map.get(&TypeId::of::<T>())?.downcast_ref()
    }

    pub fn get_mut<T: Send + 'static>(&mut self) -> Option<&mut T> {
        self.map.get_mut(&TypeId::of::<T>())?.downcast_mut()
    }

    pub fn remove<T: Send + 'static>(&mut self) -> Option<T> {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|old| old.downcast().ok().map(|b| *b))
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions").field("len", &self.map.len()).finish()
    }
}

/// Request-scoped context: the parsed request, its identity, and a slot
/// for exactly one response.
///
/// A response placed with [`Session::send`] is not written immediately;
/// the connection writes it after the middleware pipeline unwinds, so
/// after-phase middleware can still decorate it through
/// [`Session::response_mut`].
pub struct Session {
    request: Request,
    peer: Option<SocketAddr>,
    request_id: RequestId,
    response: Option<HandlerResponse>,
    sent: bool,
    json: Arc<dyn JsonEngine>,
    extensions: Extensions,
    upgrade: Option<UpgradeHandler>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("method", &self.request.method)
            .field("path", &self.request.path)
            .field("peer", &self.peer)
            .field("request_id", &self.request_id)
            .field("sent", &self.sent)
            .finish()
    }
}

impl Session {
    #[must_use]
    pub fn new(request: Request, peer: Option<SocketAddr>, json: Arc<dyn JsonEngine>) -> Self {
        let request_id = RequestId::for_request(&request);
        Self {
            request,
            peer,
            request_id,
            response: None,
            sent: false,
            json,
            extensions: Extensions::default(),
            upgrade: None,
        }
    }

    /// Session with the default JSON engine and no peer; handy in tests.
    #[must_use]
    pub fn for_request(request: Request) -> Self {
        Self::new(request, None, Arc::new(SerdeJsonEngine::default()))
    }

    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    #[must_use]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    #[must_use]
    pub fn json_engine(&self) -> &Arc<dyn JsonEngine> {
        &self.json
    }

    #[must_use]
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Place the response for this request.
    ///
    /// # Errors
    ///
    /// [`SendError::AlreadySent`] on a second call; the first response is
    /// kept.
    pub fn send(&mut self, response: HandlerResponse) -> Result<(), SendError> {
        if self.sent {
            return Err(SendError::AlreadySent);
        }
        self.sent = true;
        self.response = Some(response);
        Ok(())
    }

    /// Serialise `value` with the session's JSON engine and send it.
    ///
    /// # Errors
    ///
    /// [`SendError`] when already sent or when serialisation fails.
    pub fn send_json<T: Serialize + ?Sized>(&mut self, status: u16, value: &T) -> Result<(), SendError> {
        if self.sent {
            return Err(SendError::AlreadySent);
        }
        let body = json::serialize(self.json.as_ref(), value)?;
        self.send(HandlerResponse::bytes(status, "application/json", body))
    }

    /// # Errors
    ///
    /// [`SendError::AlreadySent`].
    pub fn send_text(&mut self, status: u16, body: impl Into<String>) -> Result<(), SendError> {
        self.send(HandlerResponse::text(status, body))
    }

    /// Empty response with just a status.
    ///
    /// # Errors
    ///
    /// [`SendError::AlreadySent`].
    pub fn send_status(&mut self, status: u16) -> Result<(), SendError> {
        self.send(HandlerResponse::new(status))
    }

    /// Response placed so far, for after-phase decoration.
    pub fn response_mut(&mut self) -> Option<&mut HandlerResponse> {
        self.response.as_mut()
    }

    #[must_use]
    pub fn response(&self) -> Option<&HandlerResponse> {
        self.response.as_ref()
    }

    /// Move the response out for writing. The session stays marked as sent.
    pub fn take_response(&mut self) -> Option<HandlerResponse> {
        self.response.take()
    }

    /// Deserialise the request body with the session's JSON engine.
    ///
    /// # Errors
    ///
    /// [`JsonError`] when the body is not valid JSON of the expected shape.
    pub fn read_json<T: DeserializeOwned>(&self) -> Result<T, JsonError> {
        json::deserialize(self.json.as_ref(), &self.request.body.contiguous())
    }

    /// Body as a JSON value, or `None` when it is empty or not JSON.
    #[must_use]
    pub fn read_json_value(&self) -> Option<Value> {
        if self.request.body.is_empty() {
            return None;
        }
        self.json.from_slice(&self.request.body.contiguous()).ok()
    }

    /// Parse a `multipart/form-data` or `application/x-www-form-urlencoded`
    /// body.
    ///
    /// Returns `None` for other content types and for malformed bodies.
    #[must_use]
    pub fn read_form(&self, limits: &MultipartLimits) -> Option<FormData> {
        let content_type = self.request.headers.content_type()?;
        let mime = content_type.split(';').next().unwrap_or("").trim();
        if mime.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
            let raw = self.request.body.contiguous();
            let text = std::str::from_utf8(&raw).ok()?;
            return Some(FormData {
                fields: parse_query(text),
                files: Vec::new(),
            });
        }
        let boundary = multipart::parse_boundary(content_type)?;
        multipart::parse(&self.request.body.to_bytes(), &boundary, limits)
    }

    pub fn set_upgrade(&mut self, handler: UpgradeHandler) {
        self.upgrade = Some(handler);
    }

    pub fn take_upgrade(&mut self) -> Option<UpgradeHandler> {
        self.upgrade.take()
    }

    /// Consume the session, returning the request (and its body buffer).
    #[must_use]
    pub fn into_request(self) -> Request {
        self.request
    }
}
