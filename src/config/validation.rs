//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that TLS options are complete
//! - Check that sticky mode has a peer to receive connections from
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: WorkerOptions → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::WorkerOptions;

/// A single semantic problem with the options.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("https is enabled but `{0}` is not set")]
    MissingTlsFile(&'static str),

    #[error("max_connections must be greater than zero")]
    NoConnectionSlots,

    #[error("sticky mode requires `ipc_path`")]
    StickyWithoutPeer,
}

/// Validate options, collecting every error found.
pub fn validate_options(options: &WorkerOptions) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if options.https {
        if options.key.is_none() {
            errors.push(ValidationError::MissingTlsFile("key"));
        }
        if options.cert.is_none() {
            errors.push(ValidationError::MissingTlsFile("cert"));
        }
    }

    if options.max_connections == 0 {
        errors.push(ValidationError::NoConnectionSlots);
    }

    if options.sticky && options.ipc_path.is_none() {
        errors.push(ValidationError::StickyWithoutPeer);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
