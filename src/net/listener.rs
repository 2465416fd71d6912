//! Listener factory and the worker's listener handle.
//!
//! # Responsibilities
//! - Build a plain or TLS listener around the application's handler
//! - Bind to the advertised port, or to an ephemeral loopback port in sticky mode
//! - Accept incoming TCP connections
//! - Serve connections injected from a peer process on the same footing
//! - Enforce max_connections limit via semaphore

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_server::accept::Accept;
use axum_server::tls_rustls::RustlsAcceptor;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::config::WorkerConfig;
use crate::http::{serve_connection, wrap_handler};
use crate::net::connection::{
    ConnectionGuard, ConnectionId, ConnectionKey, ConnectionTracker, ForwardedConnection,
};
use crate::net::tls;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// TLS material could not be turned into a server configuration.
    Tls(std::io::Error),
    /// Failed to bind to address.
    Bind(std::io::Error),
    /// The listener has not been bound yet.
    NotBound,
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Tls(e) => write!(f, "Failed to configure TLS: {}", e),
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::NotBound => write!(f, "Listener is not bound"),
        }
    }
}

impl std::error::Error for ListenerError {}

/// Error type for connection injection.
#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    #[error("connection {0:?} is already being served")]
    Duplicate(ConnectionKey),

    #[error("failed to resume connection: {0}")]
    Resume(std::io::Error),
}

/// Address the listener binds to for this configuration.
pub fn bind_address(config: &WorkerConfig) -> SocketAddr {
    if config.sticky() {
        SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
    } else if config.use_local_host() {
        SocketAddr::from((Ipv4Addr::LOCALHOST, config.port()))
    } else {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port()))
    }
}

/// Construct the listener for `config`, wrapping `handler`.
///
/// Fails only if the TLS material cannot be loaded. Nothing is bound yet.
pub async fn create_listener(
    config: &WorkerConfig,
    handler: Router,
) -> Result<ListenerHandle, ListenerError> {
    let acceptor = match config.tls() {
        Some(material) => Acceptor::Tls(tls::tls_acceptor(material).await.map_err(ListenerError::Tls)?),
        None => Acceptor::Plain,
    };

    let max_connections = config.options().max_connections;
    let server = ConnectionServer {
        router: wrap_handler(handler),
        acceptor,
        tracker: ConnectionTracker::new(),
        connection_limit: Arc::new(Semaphore::new(max_connections)),
    };

    tracing::debug!(
        scheme = config.scheme(),
        max_connections,
        "Listener created"
    );

    Ok(ListenerHandle {
        server,
        scheme: config.scheme(),
        bind_address: bind_address(config),
        max_connections,
        listener: None,
        local_addr: None,
    })
}

#[derive(Clone)]
enum Acceptor {
    Plain,
    Tls(RustlsAcceptor),
}

/// The worker's listener: bound socket plus request dispatch.
pub struct ListenerHandle {
    server: ConnectionServer,
    scheme: &'static str,
    bind_address: SocketAddr,
    max_connections: usize,
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
}

impl ListenerHandle {
    /// Bind the socket. Returns the actual local address.
    pub async fn bind(&mut self) -> Result<SocketAddr, ListenerError> {
        let listener = TcpListener::bind(self.bind_address)
            .await
            .map_err(ListenerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            scheme = self.scheme,
            max_connections = self.max_connections,
            "Listener bound"
        );

        self.listener = Some(listener);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Start accepting connections in a background task.
    pub fn spawn_accept_loop(&mut self) -> Result<JoinHandle<()>, ListenerError> {
        let listener = self.listener.take().ok_or(ListenerError::NotBound)?;
        let server = self.server.clone();
        Ok(tokio::spawn(accept_loop(listener, server)))
    }

    /// Handle for injecting forwarded connections.
    pub fn injector(&self) -> ConnectionServer {
        self.server.clone()
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.server.tracker
    }

    /// Address the listener binds (or bound) to, before resolution of port 0.
    pub fn bind_address(&self) -> SocketAddr {
        self.bind_address
    }

    /// Actual bound address, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn scheme(&self) -> &'static str {
        self.scheme
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.server.connection_limit.available_permits()
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("scheme", &self.scheme)
            .field("bind_address", &self.bind_address)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

/// Serves connections, whether accepted locally or injected.
#[derive(Clone)]
pub struct ConnectionServer {
    router: Router,
    acceptor: Acceptor,
    tracker: ConnectionTracker,
    connection_limit: Arc<Semaphore>,
}

impl ConnectionServer {
    /// Inject a connection accepted elsewhere, as if our listener had accepted it.
    ///
    /// The connection is resumed (registered with the runtime) exactly once;
    /// a second injection of a live connection is refused.
    pub fn inject(&self, connection: ForwardedConnection) -> Result<ConnectionId, InjectError> {
        let key = connection.key();
        let guard = self
            .tracker
            .track_forwarded(key)
            .ok_or(InjectError::Duplicate(key))?;
        let stream = connection.resume().map_err(InjectError::Resume)?;
        let id = guard.id();

        tracing::debug!(connection_id = %id, peer_addr = %key.peer, "Connection injected");

        let server = self.clone();
        tokio::spawn(async move {
            let Ok(permit) = server.connection_limit.clone().acquire_owned().await else {
                return;
            };
            server.serve(stream, key.peer, guard, permit).await;
        });
        Ok(id)
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    async fn serve(
        self,
        stream: TcpStream,
        peer: SocketAddr,
        guard: ConnectionGuard,
        _permit: OwnedSemaphorePermit,
    ) {
        let result = match &self.acceptor {
            Acceptor::Plain => serve_connection(stream, peer, self.router.clone()).await,
            Acceptor::Tls(acceptor) => match acceptor.accept(stream, ()).await {
                Ok((tls_stream, ())) => serve_connection(tls_stream, peer, self.router.clone()).await,
                Err(e) => {
                    tracing::debug!(connection_id = %guard.id(), peer_addr = %peer, error = %e, "TLS handshake failed");
                    return;
                }
            },
        };

        if let Err(e) = result {
            tracing::debug!(connection_id = %guard.id(), peer_addr = %peer, error = %e, "Connection error");
        }
    }
}

async fn accept_loop(listener: TcpListener, server: ConnectionServer) {
    loop {
        // Acquire permit first (backpressure)
        let Ok(permit) = server.connection_limit.clone().acquire_owned().await else {
            break;
        };

        match listener.accept().await {
            Ok((stream, peer)) => {
                let guard = server.tracker.track();
                tracing::debug!(
                    connection_id = %guard.id(),
                    peer_addr = %peer,
                    available_permits = server.connection_limit.available_permits(),
                    "Connection accepted"
                );
                tokio::spawn(server.clone().serve(stream, peer, guard, permit));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to accept connection");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}
