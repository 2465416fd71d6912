//! Shutdown coordination for the worker.
//!
//! ```text
//! Running ──first termination signal──▶ Exiting → exit 0
//! ```
//!
//! No draining: in-flight requests are abandoned. Graceful restarts are the
//! supervisor's job.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::lifecycle::exit::{ExitHandler, ExitStatus};
use crate::lifecycle::signals::{self, TerminationSignal, TerminationSignals};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Exiting,
}

/// Coordinator for immediate shutdown.
///
/// Provides a watch channel that long-running tasks can subscribe to.
pub struct Shutdown {
    state: watch::Sender<ShutdownState>,
    exit: Arc<dyn ExitHandler>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new(exit: Arc<dyn ExitHandler>) -> Self {
        let (state, _) = watch::channel(ShutdownState::Running);
        Self { state, exit }
    }

    /// Subscribe to the shutdown state.
    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    /// Move to `Exiting` and exit with status 0.
    ///
    /// Only the first call has any effect; returns whether this call was it.
    pub fn trigger(&self, signal: TerminationSignal) -> bool {
        let first = self.state.send_if_modified(|state| {
            if *state == ShutdownState::Running {
                *state = ShutdownState::Exiting;
                true
            } else {
                false
            }
        });
        if !first {
            return false;
        }

        tracing::info!(
            signal = signal.name(),
            pid = std::process::id(),
            "Worker exiting on signal"
        );
        self.exit.exit(ExitStatus::Clean);
        true
    }

    /// Listen for the first termination signal in a background task.
    pub fn listen(self: Arc<Self>) -> std::io::Result<JoinHandle<()>> {
        let signals = TerminationSignals::install()?;
        Ok(tokio::spawn(async move {
            let signal = signals.recv().await;
            signals::restore_default_dispositions();
            self.trigger(signal);
        }))
    }
}
