//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! JSON argument or TOML file
//!     → loader.rs (parse & deserialize into WorkerOptions)
//!     → validation.rs (semantic checks)
//!     → loader.rs (read TLS key/cert material)
//!     → WorkerConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! env.rs classifies the runtime environment independently of the options.
//! ```
//!
//! # Design Decisions
//! - Config is immutable once resolved; workers are restarted, not reloaded
//! - All fields have defaults to allow minimal configs
//! - Unreadable TLS material fails before any listener exists

pub mod env;
pub mod loader;
pub mod schema;
pub mod validation;

pub use env::{EnvSource, Environment, ProcessEnv, StaticEnv};
pub use loader::ConfigError;
pub use schema::{FrameworkInfo, FrameworkOption, ObservabilityConfig, TlsMaterial, WorkerConfig, WorkerOptions};
