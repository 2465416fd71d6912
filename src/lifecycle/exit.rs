//! Process exit.
//!
//! Every fatal path ends in an [`ExitHandler`] call; production uses
//! [`ProcessExit`], tests use [`RecordingExit`] to observe the status instead
//! of dying.

use std::sync::Mutex;

/// The only exit statuses this worker produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Termination signal received.
    Clean,
    /// Application failed, timed out, or the listener could not bind.
    StartupFailure,
}

impl ExitStatus {
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Clean => 0,
            ExitStatus::StartupFailure => 1,
        }
    }
}

pub trait ExitHandler: Send + Sync {
    fn exit(&self, status: ExitStatus);
}

/// Terminates the process immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExit;

impl ExitHandler for ProcessExit {
    fn exit(&self, status: ExitStatus) {
        std::process::exit(status.code());
    }
}

/// Records exit requests and keeps running.
#[derive(Debug, Default)]
pub struct RecordingExit {
    calls: Mutex<Vec<ExitStatus>>,
}

impl RecordingExit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ExitStatus> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ExitHandler for RecordingExit {
    fn exit(&self, status: ExitStatus) {
        match self.calls.lock() {
            Ok(mut calls) => calls.push(status),
            Err(poisoned) => poisoned.into_inner().push(status),
        }
    }
}
