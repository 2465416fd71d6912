//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Startup produces:
//!     → diagnostics.rs (identity, options, environment, time to serve)
//! ```
//!
//! # Design Decisions
//! - JSON logs in production, human-readable otherwise
//! - Request ID flows through every served request
//! - Diagnostics observe readiness and never drive it

pub mod diagnostics;
pub mod logging;
pub mod metrics;

pub use diagnostics::StartupDiagnostics;
pub use logging::init_logging;
