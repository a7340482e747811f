use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use may::coroutine::{self, JoinHandle};
use may::net::TcpListener;
use tracing::{debug, error, info, warn};

use super::connection::serve_connection;
use super::service::App;
use crate::config::ServerConfig;

/// Accepts TCP connections and serves each one on its own coroutine.
#[derive(Debug, Clone)]
pub struct HttpServer {
    app: Arc<App>,
}

/// Handle to a running HTTP server
///
/// Provides methods for waiting until the server is ready, stopping it gracefully,
/// or joining the accept coroutine.
pub struct ServerHandle {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener is bound to. With port 0 this is the port the
    /// OS picked.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the server to be ready to accept connections
    ///
    /// Polls the server address by attempting TCP connections until successful.
    ///
    /// # Errors
    ///
    /// Returns `TimedOut` error if the server doesn't become ready within ~250ms (50 attempts × 5ms).
    pub fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..50 {
            if TcpStream::connect(self.addr).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Stop accepting connections.
    ///
    /// Cancels the accept coroutine and waits for it to finish. Connections
    /// already being served run to completion.
    pub fn stop(self) {
        // SAFETY: may::CoroutineHandle::coroutine().cancel() is marked unsafe by the may runtime.
        // The handle is valid while we hold it and cancellation is the intended shutdown path.
        unsafe {
            self.handle.coroutine().cancel();
        }
        if self.handle.join().is_err() {
            debug!(addr = %self.addr, "Accept loop ended by cancellation");
        }
    }

    /// Block until the accept loop finishes, which only happens when it is
    /// cancelled or panics.
    ///
    /// # Errors
    ///
    /// Returns an error if the accept coroutine panicked.
    pub fn join(self) -> std::thread::Result<()> {
        self.handle.join()
    }
}

impl HttpServer {
    #[must_use]
    pub fn new(app: App) -> Self {
        Self { app: Arc::new(app) }
    }

    #[must_use]
    pub fn from_shared(app: Arc<App>) -> Self {
        Self { app }
    }

    /// Apply coroutine stack size and worker count to the may runtime.
    ///
    /// Must run before the first coroutine is spawned; later calls have no
    /// effect on coroutines that already exist.
    pub fn configure_runtime(config: &ServerConfig) {
        may::config().set_stack_size(config.stack_size);
        if let Some(workers) = config.workers {
            may::config().set_workers(workers);
        }
        debug!(
            stack_size = config.stack_size,
            workers = ?config.workers,
            "Coroutine runtime configured"
        );
    }

    /// Configure the runtime from `config` and listen on `config.address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or the port cannot be bound.
    pub fn run(app: App, config: &ServerConfig) -> io::Result<ServerHandle> {
        Self::configure_runtime(config);
        Self::new(app).start(config.address.as_str())
    }

    /// Bind `addr` and start the accept loop.
    ///
    /// Binding happens before this returns, so an unusable address is
    /// reported here rather than from the background coroutine.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or the port cannot be bound.
    pub fn start<A: ToSocketAddrs>(self, addr: A) -> io::Result<ServerHandle> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;
        let listener = TcpListener::bind(addr)?;
        let addr = listener.local_addr()?;
        let app = self.app;

        // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
        // The accept loop owns the listener and an Arc of the app.
        let handle = unsafe {
            coroutine::Builder::new()
                .name("brrtserver-accept".to_string())
                .stack_size(may::config().get_stack_size())
                .spawn(move || accept_loop(&listener, &app))
        }?;
        info!(addr = %addr, "HTTP server listening");
        Ok(ServerHandle { addr, handle })
    }
}

fn accept_loop(listener: &TcpListener, app: &Arc<App>) {
    for stream in listener.incoming() {
        let mut stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                continue;
            }
        };
        let peer = stream.peer_addr().ok();
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        let app = Arc::clone(app);

        // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
        // The connection coroutine owns its stream and an Arc of the app.
        let spawned = unsafe {
            coroutine::Builder::new()
                .stack_size(may::config().get_stack_size())
                .spawn(move || {
                    if let Err(e) = serve_connection(&mut stream, peer, &app) {
                        debug!(peer = ?peer, error = %e, "Connection ended with error");
                    }
                })
        };
        if let Err(e) = spawned {
            error!(peer = ?peer, error = %e, "Failed to spawn connection coroutine");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{Router, RouterOptions};
    use crate::server::Session;
    use std::io::{Read, Write};

    #[test]
    fn test_serves_over_tcp() {
        may::config().set_stack_size(0x8000);
        let router = Router::builder(RouterOptions::default())
            .route("GET", "/ping", |_s: &mut Session| "pong")
            .build()
            .unwrap();
        let handle = HttpServer::new(App::new(router)).start("127.0.0.1:0").unwrap();
        handle.wait_ready().unwrap();

        let mut client = TcpStream::connect(handle.addr()).unwrap();
        client
            .write_all(b"GET /ping HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .unwrap();
        let mut out = String::new();
        client.read_to_string(&mut out).unwrap();
        handle.stop();

        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"), "{out}");
        assert!(out.ends_with("pong"));
    }

    #[test]
    fn test_bad_address() {
        let router = Router::builder(RouterOptions::default()).build().unwrap();
        assert!(HttpServer::new(App::new(router)).start("not an address").is_err());
    }
}
