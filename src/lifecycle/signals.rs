//! OS signal handling.
//!
//! # Responsibilities
//! - Register handlers for SIGINT, SIGQUIT and SIGTERM
//! - Report which termination signal arrived first
//! - Hand the signals back to the platform once one has been taken
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Handlers are one-shot: after the first signal, default dispositions return

use nix::sys::signal::{self, SigHandler, Signal};
use tokio::signal::unix::{signal as register, SignalKind};

/// Signals that stop the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    /// SIGINT (Ctrl-C).
    Interrupt,
    /// SIGQUIT (Ctrl-\).
    Quit,
    /// SIGTERM (kill default).
    Terminate,
}

impl TerminationSignal {
    pub const ALL: [TerminationSignal; 3] = [
        TerminationSignal::Interrupt,
        TerminationSignal::Quit,
        TerminationSignal::Terminate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TerminationSignal::Interrupt => "SIGINT",
            TerminationSignal::Quit => "SIGQUIT",
            TerminationSignal::Terminate => "SIGTERM",
        }
    }

    fn kind(&self) -> SignalKind {
        match self {
            TerminationSignal::Interrupt => SignalKind::interrupt(),
            TerminationSignal::Quit => SignalKind::quit(),
            TerminationSignal::Terminate => SignalKind::terminate(),
        }
    }

    fn as_nix(&self) -> Signal {
        match self {
            TerminationSignal::Interrupt => Signal::SIGINT,
            TerminationSignal::Quit => Signal::SIGQUIT,
            TerminationSignal::Terminate => Signal::SIGTERM,
        }
    }
}

impl std::fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Installed termination signal listeners.
pub struct TerminationSignals {
    interrupt: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

impl TerminationSignals {
    /// Register listeners for all three signals. Must run inside a Tokio runtime.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: register(TerminationSignal::Interrupt.kind())?,
            quit: register(TerminationSignal::Quit.kind())?,
            terminate: register(TerminationSignal::Terminate.kind())?,
        })
    }

    /// Wait for the first termination signal.
    pub async fn recv(mut self) -> TerminationSignal {
        tokio::select! {
            _ = self.interrupt.recv() => TerminationSignal::Interrupt,
            _ = self.quit.recv() => TerminationSignal::Quit,
            _ = self.terminate.recv() => TerminationSignal::Terminate,
        }
    }
}

/// Give all termination signals back to the platform's default behavior.
pub fn restore_default_dispositions() {
    for sig in TerminationSignal::ALL {
        // SAFETY: installing SIG_DFL runs no Rust code in signal context.
        if let Err(e) = unsafe { signal::signal(sig.as_nix(), SigHandler::SigDfl) } {
            tracing::warn!(signal = sig.name(), error = %e, "Failed to restore default signal disposition");
        }
    }
}
