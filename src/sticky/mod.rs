//! Sticky-session connection hand-off.
//!
//! # Data Flow
//! ```text
//! peer accepts client on the shared public port
//!     → sends "sticky-session:connection" + socket descriptor
//!     → IpcChannel::recv
//!     → HandoffChannel::dispatch
//!         tag mismatch        → Ignored (forwarded to the application)
//!         no descriptor       → Rejected
//!         not a TCP socket    → Rejected
//!         already live        → Rejected
//!         otherwise           → resume + inject into the listener
//! ```
//!
//! # Design Decisions
//! - Armed only after the worker is `Listening`
//! - No per-connection acknowledgement; the peer owns flow control
//! - A failed injection drops our copy of the descriptor and nothing else

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::ipc::{Envelope, IpcChannel, PeerMessage};
use crate::lifecycle::readiness::ReadinessState;
use crate::net::{ConnectionId, ConnectionServer, ForwardedConnection, InjectError};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("worker is not listening")]
    NotListening,

    #[error("hand-off message carried no connection")]
    MissingDescriptor,

    #[error("descriptor is not a connected TCP socket: {0}")]
    NotAConnection(std::io::Error),

    #[error(transparent)]
    Inject(#[from] InjectError),
}

/// What happened to one peer message.
#[derive(Debug)]
pub enum HandoffOutcome {
    Injected(ConnectionId),
    Ignored,
    Rejected(HandoffError),
}

impl HandoffOutcome {
    fn label(&self) -> &'static str {
        match self {
            HandoffOutcome::Injected(_) => "injected",
            HandoffOutcome::Ignored => "ignored",
            HandoffOutcome::Rejected(_) => "rejected",
        }
    }
}

/// Receives connections from the peer and injects them into the listener.
pub struct HandoffChannel {
    channel: Arc<IpcChannel>,
    injector: ConnectionServer,
    readiness: watch::Receiver<ReadinessState>,
    unhandled: Option<mpsc::UnboundedSender<Envelope>>,
}

impl HandoffChannel {
    pub fn new(
        channel: Arc<IpcChannel>,
        injector: ConnectionServer,
        readiness: watch::Receiver<ReadinessState>,
    ) -> Self {
        Self {
            channel,
            injector,
            readiness,
            unhandled: None,
        }
    }

    /// Forward messages with other tags to `tx`.
    pub fn forward_unhandled(mut self, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        self.unhandled = Some(tx);
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Wait for `Listening`, then process peer messages until the channel closes.
    pub async fn run(mut self) {
        let listening = match self.readiness.wait_for(|state| !state.is_pending()).await {
            Ok(state) => *state == ReadinessState::Listening,
            Err(_) => false,
        };
        if !listening {
            tracing::debug!("Worker did not start; hand-off channel stays closed");
            return;
        }

        tracing::info!("Sticky hand-off channel armed");

        loop {
            match self.channel.recv().await {
                Ok(Some(frame)) => {
                    self.dispatch(PeerMessage::from(frame));
                }
                Ok(None) => {
                    tracing::info!("Peer closed the IPC channel");
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(error = %e, "Dropping malformed peer message");
                }
                Err(e) => {
                    tracing::error!(error = %e, "IPC channel failed; no further hand-offs");
                    break;
                }
            }
        }
    }

    /// Handle one peer message.
    pub fn dispatch(&self, message: PeerMessage) -> HandoffOutcome {
        let outcome = match message {
            PeerMessage::Other(envelope) => {
                tracing::trace!(action = %envelope.action, "Ignoring peer message");
                if let Some(tx) = &self.unhandled {
                    let _ = tx.send(envelope);
                }
                HandoffOutcome::Ignored
            }
            PeerMessage::StickyConnection(descriptor) => match self.inject(descriptor) {
                Ok(id) => HandoffOutcome::Injected(id),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping handed-off connection");
                    HandoffOutcome::Rejected(e)
                }
            },
        };
        metrics::record_handoff(outcome.label());
        outcome
    }

    fn inject(&self, descriptor: Option<std::os::fd::OwnedFd>) -> Result<ConnectionId, HandoffError> {
        if *self.readiness.borrow() != ReadinessState::Listening {
            return Err(HandoffError::NotListening);
        }
        let descriptor = descriptor.ok_or(HandoffError::MissingDescriptor)?;
        let connection =
            ForwardedConnection::from_descriptor(descriptor).map_err(HandoffError::NotAConnection)?;
        Ok(self.injector.inject(connection)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{WorkerConfig, WorkerOptions};
    use crate::net::create_listener;
    use axum::Router;
    use serde_json::Value;
    use std::os::fd::OwnedFd;

    async fn channel(state: ReadinessState) -> (HandoffChannel, watch::Sender<ReadinessState>) {
        let handle = create_listener(&WorkerConfig::plain(WorkerOptions::default()), Router::new())
            .await
            .unwrap();
        let (worker, _peer) = IpcChannel::pair().unwrap();
        let (tx, rx) = watch::channel(state);
        (HandoffChannel::new(Arc::new(worker), handle.injector(), rx), tx)
    }

    fn accepted_socket() -> (std::net::TcpStream, OwnedFd) {
        let front = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(front.local_addr().unwrap()).unwrap();
        let (accepted, _) = front.accept().unwrap();
        (client, accepted.into())
    }

    #[tokio::test]
    async fn foreign_tag_is_ignored_and_forwarded() {
        let (handoff, _state) = channel(ReadinessState::Listening).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handoff = handoff.forward_unhandled(tx);

        let outcome = handoff.dispatch(PeerMessage::Other(Envelope::new("egg-pids", Value::Null)));

        assert!(matches!(outcome, HandoffOutcome::Ignored));
        assert_eq!(rx.recv().await.unwrap().action, "egg-pids");
        assert_eq!(handoff.injector.tracker().active_count(), 0);
        assert_eq!(*handoff.readiness.borrow(), ReadinessState::Listening);
    }

    #[tokio::test]
    async fn connection_is_injected_when_listening() {
        let (handoff, _state) = channel(ReadinessState::Listening).await;
        let (_client, fd) = accepted_socket();

        let outcome = handoff.dispatch(PeerMessage::StickyConnection(Some(fd)));

        assert!(matches!(outcome, HandoffOutcome::Injected(_)));
        assert_eq!(handoff.injector.tracker().active_count(), 1);
    }

    #[tokio::test]
    async fn nothing_is_injected_before_listening() {
        let (handoff, _state) = channel(ReadinessState::Pending).await;
        let (_client, fd) = accepted_socket();

        let outcome = handoff.dispatch(PeerMessage::StickyConnection(Some(fd)));

        assert!(matches!(outcome, HandoffOutcome::Rejected(HandoffError::NotListening)));
        assert_eq!(handoff.injector.tracker().active_count(), 0);
    }

    #[tokio::test]
    async fn missing_descriptor_is_rejected() {
        let (handoff, _state) = channel(ReadinessState::Listening).await;
        let outcome = handoff.dispatch(PeerMessage::StickyConnection(None));
        assert!(matches!(outcome, HandoffOutcome::Rejected(HandoffError::MissingDescriptor)));
    }

    #[tokio::test]
    async fn double_injection_is_rejected() {
        let (handoff, _state) = channel(ReadinessState::Listening).await;
        let (_client, fd) = accepted_socket();
        let duplicate = fd.try_clone().unwrap();

        assert!(matches!(
            handoff.dispatch(PeerMessage::StickyConnection(Some(fd))),
            HandoffOutcome::Injected(_)
        ));
        assert!(matches!(
            handoff.dispatch(PeerMessage::StickyConnection(Some(duplicate))),
            HandoffOutcome::Rejected(HandoffError::Inject(InjectError::Duplicate(_)))
        ));
        assert_eq!(handoff.injector.tracker().active_count(), 1);
    }

    #[tokio::test]
    async fn run_returns_when_startup_fails() {
        let (handoff, state) = channel(ReadinessState::Pending).await;
        let task = handoff.spawn();

        state.send_replace(ReadinessState::TimedOut);

        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
