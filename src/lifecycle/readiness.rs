//! Readiness coordination.
//!
//! # State Transitions
//! ```text
//! Pending ──ready──▶ (bind) ──ok────▶ Listening   → ready notification
//!    │                      └─error─▶ Failed      → exit 1
//!    ├─────error───────────────────▶ Failed      → exit 1
//!    └─────timeout─────────────────▶ TimedOut    → exit 1
//! ```
//!
//! Exactly one of ready / error / timeout is acted on. The first to arrive
//! claims the outcome latch synchronously, before any I/O; later signals are
//! logged and dropped. Only the ready path yields a [`BindPermit`], and the
//! permit is consumed by the single transition out of `Pending` it allows.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use tokio::sync::watch;

use crate::app::AppEvent;
use crate::config::{WorkerConfig, WorkerOptions};
use crate::ipc::{PeerNotifier, WorkerMessage};
use crate::lifecycle::exit::{ExitHandler, ExitStatus};
use crate::observability::metrics;

/// Worker readiness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessState {
    Pending,
    Listening,
    Failed(String),
    TimedOut,
}

impl ReadinessState {
    pub fn is_pending(&self) -> bool {
        matches!(self, ReadinessState::Pending)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReadinessState::Pending => "pending",
            ReadinessState::Listening => "listening",
            ReadinessState::Failed(_) => "failed",
            ReadinessState::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadinessState::Failed(reason) => write!(f, "failed: {}", reason),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartOutcome {
    Ready,
    Error,
    Timeout,
}

impl StartOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            StartOutcome::Ready => "ready",
            StartOutcome::Error => "error",
            StartOutcome::Timeout => "timeout",
        }
    }
}

struct Inner {
    outcome: OnceLock<StartOutcome>,
    state: watch::Sender<ReadinessState>,
    exit: Arc<dyn ExitHandler>,
    notifier: Option<PeerNotifier>,
    options: WorkerOptions,
}

/// One-shot readiness state machine.
#[derive(Clone)]
pub struct ReadinessCoordinator {
    inner: Arc<Inner>,
}

impl ReadinessCoordinator {
    pub fn new(
        config: &WorkerConfig,
        exit: Arc<dyn ExitHandler>,
        notifier: Option<PeerNotifier>,
    ) -> Self {
        let (state, _) = watch::channel(ReadinessState::Pending);
        Self {
            inner: Arc::new(Inner {
                outcome: OnceLock::new(),
                state,
                exit,
                notifier,
                options: config.options().clone(),
            }),
        }
    }

    /// The application finished initializing.
    ///
    /// Returns the permit to bind the listener if this is the first start
    /// event; `None` otherwise.
    pub fn signal_ready(&self) -> Option<BindPermit> {
        if !self.settle(StartOutcome::Ready) {
            return None;
        }
        tracing::debug!("Application ready, binding listener");
        Some(BindPermit {
            coordinator: self.clone(),
        })
    }

    /// The application failed to initialize. Returns whether this signal won.
    pub fn signal_error(&self, reason: impl Into<String>) -> bool {
        if !self.settle(StartOutcome::Error) {
            return false;
        }
        let reason = reason.into();
        tracing::error!(reason = %reason, "Application start error, exiting now");
        self.fail(ReadinessState::Failed(reason));
        true
    }

    /// The application did not initialize in time. Returns whether this signal won.
    pub fn signal_timeout(&self) -> bool {
        if !self.settle(StartOutcome::Timeout) {
            return false;
        }
        tracing::error!("Application start timeout, exiting now");
        self.fail(ReadinessState::TimedOut);
        true
    }

    /// Route an application event to the matching signal.
    pub fn handle(&self, event: AppEvent) -> Option<BindPermit> {
        match event {
            AppEvent::Ready => self.signal_ready(),
            AppEvent::Error(reason) => {
                self.signal_error(reason);
                None
            }
            AppEvent::StartTimeout => {
                self.signal_timeout();
                None
            }
        }
    }

    pub fn state(&self) -> ReadinessState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReadinessState> {
        self.inner.state.subscribe()
    }

    /// Wait until the state leaves `Pending` and return it.
    pub async fn await_ready(&self) -> ReadinessState {
        let mut rx = self.subscribe();
        let result = rx.wait_for(|state| !state.is_pending()).await.map(|state| state.clone());
        // The sender lives in `self`, so the channel cannot close while we wait.
        result.unwrap_or_else(|_| self.state())
    }

    fn settle(&self, outcome: StartOutcome) -> bool {
        match self.inner.outcome.set(outcome) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(
                    event = outcome.as_str(),
                    settled = self.inner.outcome.get().map(StartOutcome::as_str),
                    "Ignoring start event after startup settled"
                );
                false
            }
        }
    }

    fn transition(&self, next: ReadinessState) -> bool {
        let label = next.label();
        let changed = self.inner.state.send_if_modified(|state| {
            if state.is_pending() {
                *state = next;
                true
            } else {
                false
            }
        });
        if changed {
            metrics::record_readiness(label);
        }
        changed
    }

    fn fail(&self, state: ReadinessState) {
        if self.transition(state) {
            self.inner.exit.exit(ExitStatus::StartupFailure);
        }
    }
}

impl std::fmt::Debug for ReadinessCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessCoordinator")
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

/// Permission to complete startup, granted to the winning ready signal.
#[must_use = "startup stays pending until the permit is completed"]
pub struct BindPermit {
    coordinator: ReadinessCoordinator,
}

impl BindPermit {
    /// The listener is bound: the worker is serving. Notifies the peer.
    pub fn listening(self, addr: SocketAddr) {
        if !self.coordinator.transition(ReadinessState::Listening) {
            return;
        }
        tracing::debug!(address = %addr, "Worker listening");

        let inner = &self.coordinator.inner;
        match &inner.notifier {
            Some(notifier) => {
                if notifier.send(WorkerMessage::Ready(inner.options.clone())).is_err() {
                    tracing::warn!("Peer channel closed; ready notification dropped");
                }
            }
            None => tracing::debug!("No peer channel; ready notification skipped"),
        }
    }

    /// The listener could not bind: the worker cannot serve.
    pub fn bind_failed(self, error: impl std::fmt::Display) {
        let reason = format!("listener bind failed: {}", error);
        tracing::error!(reason = %reason, "Application start error, exiting now");
        self.coordinator.fail(ReadinessState::Failed(reason));
    }
}
