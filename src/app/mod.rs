//! The application contract.
//!
//! A framework plugs into the worker by implementing [`Application`]: it
//! supplies the single request handler and reports the outcome of its own
//! initialization through [`AppEvents`]. Start timeouts are the
//! application's business; the worker only reacts to the event.

pub mod default;

use tokio::sync::mpsc;

use crate::ipc::Envelope;
use crate::net::ListenerHandle;

pub use default::DefaultApplication;

/// Outcome of application initialization, as reported by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Ready,
    Error(String),
    StartTimeout,
}

/// Sender through which an application reports initialization events.
///
/// Events after the first are delivered but ignored by the worker.
#[derive(Debug, Clone)]
pub struct AppEvents {
    tx: mpsc::UnboundedSender<AppEvent>,
}

impl AppEvents {
    /// New sender and the receiver the worker drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn ready(&self) {
        self.emit(AppEvent::Ready);
    }

    pub fn error(&self, reason: impl std::fmt::Display) {
        self.emit(AppEvent::Error(reason.to_string()));
    }

    pub fn start_timeout(&self) {
        self.emit(AppEvent::StartTimeout);
    }

    fn emit(&self, event: AppEvent) {
        if self.tx.send(event.clone()).is_err() {
            tracing::trace!(?event, "Worker no longer listening for application events");
        }
    }
}

/// A framework application hosted by the worker.
pub trait Application: Send + Sync + 'static {
    /// The request handler. Called once, when the listener is created.
    fn router(&self) -> axum::Router;

    /// Begin initialization. Must return promptly and report through `events`.
    fn start(&self, events: AppEvents);

    /// Called with the listener after construction and before binding.
    fn on_server(&self, _listener: &ListenerHandle) {}

    /// Peer messages that are not connection hand-offs.
    fn on_peer_message(&self, _message: &Envelope) {}
}
