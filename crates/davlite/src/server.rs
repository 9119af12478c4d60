//! HTTP server lifecycle management.
//!
//! The accept loop admits at most `max_connections` connections at a time:
//! it waits for a semaphore permit before accepting, and each connection
//! task holds its permit until the connection closes.
//!
//! A connection must start a request within `header_read_timeout` of being
//! accepted and of finishing its previous response, or it is closed. Silent
//! or idle keep-alive sockets therefore give their permit back instead of
//! starving the accept loop.

use crate::credentials::Authenticator;
use crate::dispatch::Dispatcher;
use crate::sandbox::StorageRoot;
use hyper::Request;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use std::convert::Infallible;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, oneshot};
use tracing::{debug, error, info, warn};

/// Pause after a failed accept so a persistent error (e.g. out of file
/// descriptors) does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Configuration for the WebDAV server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (port 0 = auto-assign).
    pub listen_address: SocketAddr,
    /// Directory exposed to clients; created if missing.
    pub storage_root: PathBuf,
    /// Whether requests must carry valid Basic credentials.
    pub require_auth: bool,
    /// Realm sent in the `WWW-Authenticate` challenge.
    pub realm: String,
    /// Maximum number of connections served concurrently.
    pub max_connections: usize,
    /// How long a connection may sit without sending a complete request head.
    pub header_read_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            storage_root: PathBuf::from("./webdav-storage"),
            require_auth: true,
            realm: "WebDAV Server".to_string(),
            max_connections: 256,
            header_read_timeout: Duration::from_secs(30),
        }
    }
}

/// A running WebDAV server instance.
pub struct DavServer {
    /// The actual bound address.
    pub addr: SocketAddr,
    root: StorageRoot,
    /// Shutdown signal sender.
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// Server task handle.
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl DavServer {
    /// Open the storage root, bind the listener and start serving.
    ///
    /// `authenticator` is required when `config.require_auth` is set and
    /// ignored otherwise.
    pub async fn start(
        config: &ServerConfig,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Result<Self, io::Error> {
        if config.max_connections == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "max_connections must be at least 1",
            ));
        }
        if config.header_read_timeout.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "header_read_timeout must be non-zero",
            ));
        }

        let root = StorageRoot::open(&config.storage_root)?;
        let mut dispatcher = Dispatcher::new(root.clone());
        if config.require_auth {
            let Some(auth) = authenticator else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "authentication is required but no credential store was provided",
                ));
            };
            dispatcher = dispatcher.with_authenticator(auth, &config.realm);
        }

        let listener = TcpListener::bind(config.listen_address).await?;
        let actual_addr = listener.local_addr()?;

        info!(
            addr = %actual_addr,
            root = %root.path().display(),
            require_auth = config.require_auth,
            max_connections = config.max_connections,
            "Starting WebDAV server"
        );

        let dispatcher = Arc::new(dispatcher);
        let permits = Arc::new(Semaphore::new(config.max_connections));
        let header_read_timeout = config.header_read_timeout;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let server_handle = tokio::spawn(async move {
            tokio::select! {
                () = run_server(listener, dispatcher, permits, header_read_timeout) => {
                    debug!("Server loop ended");
                }
                _ = shutdown_rx => {
                    info!("Received shutdown signal");
                }
            }
        });

        Ok(Self {
            addr: actual_addr,
            root,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    /// Get the URL for this server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Canonical path of the directory being served.
    pub fn storage_root(&self) -> &std::path::Path {
        self.root.path()
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    ///
    /// Connections already being served finish on their own tasks.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            let _ = handle.await;
        }
        info!("WebDAV server stopped");
    }

    /// Stop the server synchronously (for use in Drop).
    fn stop_sync(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            handle.abort();
        }
    }
}

impl Drop for DavServer {
    fn drop(&mut self) {
        self.stop_sync();
    }
}

/// Run the server accept loop.
async fn run_server(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    permits: Arc<Semaphore>,
    header_read_timeout: Duration,
) {
    loop {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            warn!("Connection semaphore closed");
            return;
        };
        if permits.available_permits() == 0 {
            debug!("Connection limit reached, waiting for a slot before accepting more");
        }

        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    let _permit = permit;
                    if !first_byte_within(&stream, header_read_timeout).await {
                        debug!(peer = %peer_addr, "Closing connection that sent no request");
                        return;
                    }

                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req: Request<Incoming>| {
                        let dispatcher = Arc::clone(&dispatcher);
                        async move { Ok::<_, Infallible>(dispatcher.handle(req).await) }
                    });

                    let mut builder = auto::Builder::new(TokioExecutor::new());
                    builder
                        .http1()
                        .timer(TokioTimer::new())
                        .header_read_timeout(header_read_timeout);
                    builder.http2().timer(TokioTimer::new());

                    if let Err(e) = builder.serve_connection(io, service).await {
                        warn!(peer = %peer_addr, error = %e, "HTTP connection error");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                drop(permit);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Wait until the peer has sent at least one byte.
///
/// Protocol detection in the connection builder waits for data with no
/// deadline of its own, so a silent socket is cut off here.
async fn first_byte_within(stream: &TcpStream, timeout: Duration) -> bool {
    let mut buf = [0u8; 1];
    matches!(
        tokio::time::timeout(timeout, stream.peek(&mut buf)).await,
        Ok(Ok(n)) if n > 0
    )
}
