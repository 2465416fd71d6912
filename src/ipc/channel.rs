//! Unix socket channel with descriptor passing.
//!
//! # Responsibilities
//! - Frame and unframe messages on a stream socket
//! - Attach a descriptor to a frame (`SCM_RIGHTS`) and recover it on receipt
//! - Serialize concurrent writers so frames never interleave
//! - Drain the worker's outbound queue from a single writer task

use std::collections::VecDeque;
use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::sync::Arc;

use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};
use thiserror::Error;
use tokio::io::Interest;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::ipc::frame::{self, Frame, FrameDecoder, FrameError};
use crate::ipc::message::{Envelope, WorkerMessage};

const READ_CHUNK: usize = 8 * 1024;
const MAX_DESCRIPTORS_PER_READ: usize = 8;

#[cfg(any(target_os = "linux", target_os = "android"))]
const RECV_FLAGS: MsgFlags = MsgFlags::MSG_CMSG_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const RECV_FLAGS: MsgFlags = MsgFlags::empty();

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IPC socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("peer closed the channel mid-frame")]
    Truncated,
}

impl IpcError {
    /// Whether the channel can keep reading after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, IpcError::Frame(e) if e.is_recoverable())
    }
}

/// Sending half handed to components that notify the peer.
pub type PeerNotifier = mpsc::UnboundedSender<WorkerMessage>;

#[derive(Default)]
struct ReadState {
    decoder: FrameDecoder,
    descriptors: VecDeque<OwnedFd>,
}

/// Bidirectional message channel to the peer process.
pub struct IpcChannel {
    stream: UnixStream,
    read_state: Mutex<ReadState>,
    write_lock: Mutex<()>,
}

impl IpcChannel {
    /// Connect to the peer's socket.
    pub async fn connect(path: &Path) -> Result<Self, IpcError> {
        let stream = UnixStream::connect(path).await?;
        tracing::debug!(path = %path.display(), "IPC channel connected");
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            stream,
            read_state: Mutex::new(ReadState::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Connected pair of channels.
    pub fn pair() -> Result<(Self, Self), IpcError> {
        let (a, b) = UnixStream::pair()?;
        Ok((Self::from_stream(a), Self::from_stream(b)))
    }

    /// Send a message without a descriptor.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), IpcError> {
        let bytes = frame::encode(envelope, false)?;
        let _guard = self.write_lock.lock().await;
        self.write_all(&bytes).await
    }

    /// Send a message with `descriptor` attached.
    ///
    /// The descriptor is duplicated into the receiving process; the caller
    /// keeps its own copy.
    pub async fn send_with_descriptor(
        &self,
        envelope: &Envelope,
        descriptor: BorrowedFd<'_>,
    ) -> Result<(), IpcError> {
        let bytes = frame::encode(envelope, true)?;
        let _guard = self.write_lock.lock().await;

        let socket = self.stream.as_raw_fd();
        let fd = descriptor.as_raw_fd();
        let sent = self
            .stream
            .async_io(Interest::WRITABLE, || send_with_rights(socket, &bytes, fd))
            .await?;
        self.write_all(&bytes[sent..]).await
    }

    /// Receive the next message. `None` once the peer has closed the channel.
    pub async fn recv(&self) -> Result<Option<Frame>, IpcError> {
        let mut state = self.read_state.lock().await;
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some(raw) = state.decoder.decode()? {
                let descriptor = if raw.with_descriptor {
                    state.descriptors.pop_front()
                } else {
                    None
                };
                let envelope = raw.envelope()?;
                return Ok(Some(Frame { envelope, descriptor }));
            }

            let socket = self.stream.as_raw_fd();
            let (read, descriptors) = self
                .stream
                .async_io(Interest::READABLE, || recv_with_rights(socket, &mut chunk))
                .await?;
            state.descriptors.extend(descriptors);

            if read == 0 {
                return if state.decoder.is_empty() {
                    Ok(None)
                } else {
                    Err(IpcError::Truncated)
                };
            }
            state.decoder.extend(&chunk[..read]);
        }
    }

    async fn write_all(&self, mut buf: &[u8]) -> Result<(), IpcError> {
        while !buf.is_empty() {
            self.stream.writable().await?;
            match self.stream.try_write(buf) {
                Ok(0) => return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into()),
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for IpcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcChannel")
            .field("fd", &self.stream.as_raw_fd())
            .finish()
    }
}

fn send_with_rights(socket: RawFd, bytes: &[u8], fd: RawFd) -> std::io::Result<usize> {
    let iov = [IoSlice::new(bytes)];
    let fds = [fd];
    let cmsgs = [ControlMessage::ScmRights(&fds)];
    Ok(sendmsg::<()>(socket, &iov, &cmsgs, MsgFlags::empty(), None)?)
}

fn recv_with_rights(socket: RawFd, buf: &mut [u8]) -> std::io::Result<(usize, Vec<OwnedFd>)> {
    let mut iov = [IoSliceMut::new(buf)];
    let mut space = nix::cmsg_space!([RawFd; MAX_DESCRIPTORS_PER_READ]);
    let msg = recvmsg::<()>(socket, &mut iov, Some(&mut space), RECV_FLAGS)?;

    let mut descriptors = Vec::new();
    for cmsg in msg.cmsgs() {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            for fd in fds {
                // SAFETY: the kernel just installed this descriptor in our
                // table and nothing else has taken ownership of it.
                descriptors.push(unsafe { OwnedFd::from_raw_fd(fd) });
            }
        }
    }
    if msg.flags.contains(MsgFlags::MSG_CTRUNC) {
        tracing::warn!("Ancillary data truncated; some descriptors were lost");
    }
    Ok((msg.bytes, descriptors))
}

/// Forward queued worker messages to the peer until the queue closes.
pub fn spawn_writer(
    channel: Arc<IpcChannel>,
    mut outbox: mpsc::UnboundedReceiver<WorkerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = outbox.recv().await {
            let envelope = match message.to_envelope() {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::error!(action = message.action(), error = %e, "Failed to encode message");
                    continue;
                }
            };
            match channel.send(&envelope).await {
                Ok(()) => tracing::debug!(action = message.action(), "Message sent to peer"),
                Err(e) => tracing::error!(action = message.action(), error = %e, "Failed to send message to peer"),
            }
        }
    })
}
