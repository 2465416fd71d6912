//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Diagnostics → Create listener → Start application
//!         → readiness.rs: first of ready / error / timeout wins
//!         → Bind → Listening → notify peer, accept, receive hand-offs
//!
//! Shutdown (shutdown.rs):
//!     SIGINT / SIGQUIT / SIGTERM (signals.rs) → Exiting → exit 0
//!
//! Failure (exit.rs):
//!     start error / start timeout / bind failure → exit 1
//! ```
//!
//! # Design Decisions
//! - No traffic before the application reports ready
//! - Exactly one startup outcome is acted on
//! - Shutdown does not drain; the supervisor restarts workers

pub mod exit;
pub mod readiness;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use exit::{ExitHandler, ExitStatus, ProcessExit, RecordingExit};
pub use readiness::{BindPermit, ReadinessCoordinator, ReadinessState};
pub use shutdown::{Shutdown, ShutdownState};
pub use signals::TerminationSignal;
pub use startup::{RunningWorker, Worker, WorkerError};
