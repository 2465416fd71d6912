//! Inter-process channel to the peer process.
//!
//! # Data Flow
//! ```text
//! Peer → worker:
//!     Unix socket bytes + SCM_RIGHTS descriptors
//!     → channel.rs (recvmsg, descriptor queue)
//!     → frame.rs (length-prefixed JSON frames)
//!     → message.rs (PeerMessage: sticky connection or other)
//!
//! Worker → peer:
//!     WorkerMessage → outbound queue → writer task → frame.rs → socket
//! ```
//!
//! # Design Decisions
//! - Messages are typed at both ends; the tag is the only routing key
//! - Components never write to the socket directly; they enqueue
//! - Descriptors are paired with flagged frames strictly in order

pub mod channel;
pub mod frame;
pub mod message;

pub use channel::{spawn_writer, IpcChannel, IpcError, PeerNotifier};
pub use frame::Frame;
pub use message::{Envelope, PeerMessage, WorkerMessage, STICKY_CONNECTION, WORKER_READY};
