//! Typed messages exchanged with the peer process.

use std::os::fd::OwnedFd;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::WorkerOptions;
use crate::ipc::frame::Frame;

/// Tag of a frame carrying a connection accepted by the peer.
pub const STICKY_CONNECTION: &str = "sticky-session:connection";

/// Tag of the worker's one-time ready notification.
pub const WORKER_READY: &str = "egg-ready";

/// Untyped message as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Envelope {
    pub fn new(action: impl Into<String>, data: Value) -> Self {
        Self {
            action: action.into(),
            data,
        }
    }
}

/// Worker → peer.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    /// Sent once, after the application is ready and the listener is bound.
    Ready(WorkerOptions),
}

impl WorkerMessage {
    pub fn action(&self) -> &'static str {
        match self {
            WorkerMessage::Ready(_) => WORKER_READY,
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, serde_json::Error> {
        let data = match self {
            WorkerMessage::Ready(options) => serde_json::to_value(options)?,
        };
        Ok(Envelope::new(self.action(), data))
    }
}

/// Peer → worker.
#[derive(Debug)]
pub enum PeerMessage {
    /// A hand-off. The descriptor is absent if the peer failed to attach one.
    StickyConnection(Option<OwnedFd>),
    /// Anything else; not ours to interpret.
    Other(Envelope),
}

impl From<Frame> for PeerMessage {
    fn from(frame: Frame) -> Self {
        if frame.envelope.action == STICKY_CONNECTION {
            PeerMessage::StickyConnection(frame.descriptor)
        } else {
            // A stray descriptor on a foreign message is closed here.
            PeerMessage::Other(frame.envelope)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_carries_options() {
        let options = WorkerOptions {
            port: 7001,
            ..Default::default()
        };
        let envelope = WorkerMessage::Ready(options).to_envelope().unwrap();

        assert_eq!(envelope.action, "egg-ready");
        assert_eq!(envelope.data["port"], 7001);
        assert_eq!(envelope.data["sticky"], false);
    }

    #[test]
    fn classifies_by_tag() {
        let sticky = Frame {
            envelope: Envelope::new(STICKY_CONNECTION, Value::Null),
            descriptor: None,
        };
        assert!(matches!(PeerMessage::from(sticky), PeerMessage::StickyConnection(None)));

        let other = Frame {
            envelope: Envelope::new("sticky-session:other", Value::Null),
            descriptor: None,
        };
        match PeerMessage::from(other) {
            PeerMessage::Other(envelope) => assert_eq!(envelope.action, "sticky-session:other"),
            m => panic!("unexpected {:?}", m),
        }
    }

    #[test]
    fn envelope_without_data_round_trips_compactly() {
        let json = serde_json::to_string(&Envelope::new("ping", Value::Null)).unwrap();
        assert_eq!(json, r#"{"action":"ping"}"#);
    }
}
