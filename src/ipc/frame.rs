//! Wire framing for the inter-process channel.
//!
//! ```text
//! +----------------+---------+----------------------+
//! | length (u32 BE)| flags   | JSON payload         |
//! +----------------+---------+----------------------+
//! ```
//!
//! Flag bit 0 marks a frame whose bytes carry a descriptor as ancillary data.

use std::os::fd::OwnedFd;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::ipc::message::Envelope;

pub const HEADER_LEN: usize = 5;
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const FLAG_DESCRIPTOR: u8 = 0b0000_0001;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    TooLarge(usize),

    #[error("unknown frame flags {0:#04x}")]
    UnknownFlags(u8),

    #[error("invalid frame payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl FrameError {
    /// Whether the stream is still aligned on a frame boundary after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::Payload(_))
    }
}

/// A decoded message, with its descriptor if one was attached.
#[derive(Debug)]
pub struct Frame {
    pub envelope: Envelope,
    pub descriptor: Option<OwnedFd>,
}

/// Header and undecoded payload of one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub with_descriptor: bool,
    pub payload: Bytes,
}

impl RawFrame {
    pub fn envelope(&self) -> Result<Envelope, FrameError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Serialize `envelope` into a complete frame.
pub fn encode(envelope: &Envelope, with_descriptor: bool) -> Result<Bytes, FrameError> {
    let payload = serde_json::to_vec(envelope)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_u8(if with_descriptor { FLAG_DESCRIPTOR } else { 0 });
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Incremental decoder over a byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// True when no partial frame is buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Next complete frame, if buffered.
    pub fn decode(&mut self) -> Result<Option<RawFrame>, FrameError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(len));
        }
        let flags = self.buf[4];
        if flags & !FLAG_DESCRIPTOR != 0 {
            return Err(FrameError::UnknownFlags(flags));
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }

        self.buf.advance(HEADER_LEN);
        let payload = self.buf.split_to(len).freeze();
        Ok(Some(RawFrame {
            with_descriptor: flags & FLAG_DESCRIPTOR != 0,
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_frames_split_across_reads() {
        let first = encode(&Envelope::new("a", json!({"n": 1})), false).unwrap();
        let second = encode(&Envelope::new("b", serde_json::Value::Null), true).unwrap();
        let mut stream = first.to_vec();
        stream.extend_from_slice(&second);

        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream[..3]);
        assert!(decoder.decode().unwrap().is_none());

        decoder.extend(&stream[3..first.len() + 2]);
        let frame = decoder.decode().unwrap().unwrap();
        assert!(!frame.with_descriptor);
        assert_eq!(frame.envelope().unwrap().action, "a");
        assert!(decoder.decode().unwrap().is_none());

        decoder.extend(&stream[first.len() + 2..]);
        let frame = decoder.decode().unwrap().unwrap();
        assert!(frame.with_descriptor);
        assert_eq!(frame.envelope().unwrap(), Envelope::new("b", serde_json::Value::Null));
        assert!(decoder.is_empty());
    }

    #[test]
    fn rejects_oversized_length() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0xFF, 0xFF, 0xFF, 0xFF, 0x00]);
        assert!(matches!(decoder.decode(), Err(FrameError::TooLarge(_))));
    }

    #[test]
    fn rejects_unknown_flags() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0, 0, 0, 2, 0x80, b'{', b'}']);
        let err = decoder.decode().unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn bad_payload_is_recoverable() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0, 0, 0, 3, 0, b'n', b'o', b'!']);
        let frame = decoder.decode().unwrap().unwrap();
        let err = frame.envelope().unwrap_err();
        assert!(err.is_recoverable());
        assert!(decoder.is_empty());
    }
}
