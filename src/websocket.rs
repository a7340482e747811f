//! WebSocket upgrade handshake.
//!
//! Only the RFC 6455 opening handshake lives here. After the `101 Switching
//! Protocols` response is written, the connection loop stops parsing HTTP and
//! hands the raw stream to the [`UpgradeHandler`], together with any bytes the
//! client sent after its request that were already buffered. Framing is the
//! handler's business.

use std::fmt;
use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http::Version;
use sha1::{Digest, Sha1};

use crate::dispatcher::Reply;
use crate::http::{ByteSequence, HandlerResponse, Request};

/// GUID appended to the client key (RFC 6455 section 1.3).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Raw, bidirectional connection stream after an upgrade.
pub trait Upgraded: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> Upgraded for T {}

/// Takes over the connection once the switch-protocol response is out.
///
/// The second argument holds bytes received after the upgrade request that
/// the parser had already buffered.
pub struct UpgradeHandler(Box<dyn FnOnce(&mut dyn Upgraded, ByteSequence) + Send>);

impl UpgradeHandler {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(&mut dyn Upgraded, ByteSequence) + Send + 'static,
    {
        Self(Box::new(f))
    }

    pub fn run(self, stream: &mut dyn Upgraded, leftover: ByteSequence) {
        (self.0)(stream, leftover);
    }
}

impl fmt::Debug for UpgradeHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UpgradeHandler")
    }
}

/// Handshake rejection reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("not a websocket upgrade request")]
    NotUpgrade,
    #[error("websocket upgrade requires GET over HTTP/1.1")]
    BadRequestLine,
    #[error("missing Sec-WebSocket-Key")]
    MissingKey,
    #[error("unsupported Sec-WebSocket-Version")]
    UnsupportedVersion,
}

impl HandshakeError {
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            HandshakeError::UnsupportedVersion => 426,
            _ => 400,
        }
    }
}

/// True when the request asks to switch to the websocket protocol.
#[must_use]
pub fn is_websocket_upgrade(request: &Request) -> bool {
    request.is_upgrade_to("websocket")
}

/// `Sec-WebSocket-Accept` value for a client key.
///
/// ```
/// use brrtserver::websocket::accept_key;
///
/// assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Validate the handshake and build the reply that performs the upgrade.
///
/// # Errors
///
/// [`HandshakeError`] when the request is not an acceptable websocket
/// opening handshake; map it with [`HandshakeError::status`].
pub fn accept<F>(request: &Request, on_upgrade: F) -> Result<Reply, HandshakeError>
where
    F: FnOnce(&mut dyn Upgraded, ByteSequence) + Send + 'static,
{
    if !is_websocket_upgrade(request) {
        return Err(HandshakeError::NotUpgrade);
    }
    if request.method != http::Method::GET || request.version != Version::HTTP_11 {
        return Err(HandshakeError::BadRequestLine);
    }
    let key = request
        .header("sec-websocket-key")
        .filter(|k| !k.trim().is_empty())
        .ok_or(HandshakeError::MissingKey)?;
    if request.header("sec-websocket-version").map(str::trim) != Some("13") {
        return Err(HandshakeError::UnsupportedVersion);
    }

    let response = HandlerResponse::new(101)
        .with_header("Upgrade", "websocket")
        .with_header("Connection", "Upgrade")
        .with_header("Sec-WebSocket-Accept", accept_key(key));
    Ok(Reply::Upgrade(response, UpgradeHandler::new(on_upgrade)))
}
