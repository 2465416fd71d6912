//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Listener factory (listener.rs)
//!     config + application router → ListenerHandle (TLS via tls.rs)
//!
//! Own listener:
//!     accept loop → connection limit → connection.rs (tracking)
//!     → Hand off to HTTP layer
//!
//! Sticky mode:
//!     descriptor from peer → ForwardedConnection → inject
//!     → connection limit → connection.rs (tracking) → HTTP layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Injected connections share the accepted path, permits included
//! - TLS is optional and handled transparently

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionId, ConnectionKey, ConnectionTracker, ForwardedConnection};
pub use listener::{bind_address, create_listener, ConnectionServer, InjectError, ListenerError, ListenerHandle};
