//! Connection identity and lifetime tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count live connections, whatever their origin
//! - Remember which forwarded connections are live so a second hand-off of
//!   the same socket is refused
//! - Own the forwarded socket until it is resumed

use std::net::SocketAddr;
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// How a connection reached this worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOrigin {
    /// Accepted on our own listener.
    Accepted,
    /// Accepted by the peer process and handed to us.
    HandedOff,
}

impl ConnectionOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionOrigin::Accepted => "accepted",
            ConnectionOrigin::HandedOff => "handed_off",
        }
    }
}

/// The address pair identifying a TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub local: SocketAddr,
    pub peer: SocketAddr,
}

/// Tracks live connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    /// Current count of active connections.
    active_count: Arc<AtomicU64>,
    /// Forwarded connections currently being served.
    forwarded: Arc<DashMap<ConnectionKey, ConnectionId>>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection accepted on our own listener.
    pub fn track(&self) -> ConnectionGuard {
        self.open(ConnectionOrigin::Accepted, None)
    }

    /// Record a forwarded connection.
    ///
    /// Returns `None` if a connection with the same address pair is already
    /// live, i.e. the same socket was handed over twice.
    pub fn track_forwarded(&self, key: ConnectionKey) -> Option<ConnectionGuard> {
        let id = ConnectionId::new();
        match self.forwarded.entry(key) {
            Entry::Occupied(_) => return None,
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        Some(self.open_with_id(id, ConnectionOrigin::HandedOff, Some(key)))
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Whether a forwarded connection with this address pair is live.
    pub fn is_forwarded(&self, key: &ConnectionKey) -> bool {
        self.forwarded.contains_key(key)
    }

    fn open(&self, origin: ConnectionOrigin, key: Option<ConnectionKey>) -> ConnectionGuard {
        self.open_with_id(ConnectionId::new(), origin, key)
    }

    fn open_with_id(
        &self,
        id: ConnectionId,
        origin: ConnectionOrigin,
        key: Option<ConnectionKey>,
    ) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        metrics::record_connection_opened(origin.as_str());
        ConnectionGuard {
            tracker: self.clone(),
            id,
            origin,
            key,
        }
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: ConnectionTracker,
    id: ConnectionId,
    origin: ConnectionOrigin,
    key: Option<ConnectionKey>,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn origin(&self) -> ConnectionOrigin {
        self.origin
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key {
            self.tracker.forwarded.remove(&key);
        }
        self.tracker.active_count.fetch_sub(1, Ordering::SeqCst);
        metrics::record_connection_closed();
        tracing::trace!(connection_id = %self.id, origin = self.origin.as_str(), "Connection closed");
    }
}

/// A connection accepted by the peer process, paused until resumed here.
#[derive(Debug)]
pub struct ForwardedConnection {
    socket: std::net::TcpStream,
    key: ConnectionKey,
}

impl ForwardedConnection {
    /// Adopt a received descriptor.
    ///
    /// Fails if the descriptor is not a connected TCP socket.
    pub fn from_descriptor(fd: OwnedFd) -> std::io::Result<Self> {
        let socket = std::net::TcpStream::from(fd);
        let key = ConnectionKey {
            local: socket.local_addr()?,
            peer: socket.peer_addr()?,
        };
        Ok(Self { socket, key })
    }

    pub fn key(&self) -> ConnectionKey {
        self.key
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.key.peer
    }

    /// Re-enable reads by handing the socket to the runtime.
    ///
    /// Consumes the connection, so it can only be resumed once.
    /// Must be called from within a Tokio runtime.
    pub fn resume(self) -> std::io::Result<tokio::net::TcpStream> {
        self.socket.set_nonblocking(true)?;
        tokio::net::TcpStream::from_std(self.socket)
    }
}
