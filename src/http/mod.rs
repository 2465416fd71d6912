//! HTTP layer.
//!
//! # Data Flow
//! ```text
//! Established stream (accepted or handed off, TLS already terminated)
//!     → server.rs (HTTP/1.1 + HTTP/2 connection driver)
//!     → request.rs (request ID, tracing)
//!     → application router
//! ```

pub mod request;
pub mod server;

pub use request::wrap_handler;
pub use server::serve_connection;
