//! Peer connection handling
//!
//! A connection is split on creation: the write half lives in a shared
//! [`PeerHandle`] (held by the registry and used for broadcast), the read
//! half in a [`PeerReader`] owned by exactly one receive loop. Closing the
//! handle cancels the reader, so a loop blocked in a read wakes up at once.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::sync::framing::{read_frame, write_encoded_frame};
use crate::{Error, Result};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Lifecycle of a single connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Entry point for creating connections
pub struct PeerConnection;

impl PeerConnection {
    /// Split an accepted or connected TCP stream.
    ///
    /// `parent` is the session's shutdown token; cancelling it closes this
    /// connection too.
    pub fn from_tcp(stream: TcpStream, parent: &CancellationToken) -> (Arc<PeerHandle>, PeerReader) {
        let label = stream
            .peer_addr()
            .map(|addr: SocketAddr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        Self::from_parts(read_half, write_half, label, parent)
    }

    /// Build a connection from any reader/writer pair.
    pub fn from_parts<R, W>(
        reader: R,
        writer: W,
        peer: impl Into<String>,
        parent: &CancellationToken,
    ) -> (Arc<PeerHandle>, PeerReader)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let id = Uuid::new_v4();
        let closed = parent.child_token();
        let peer = peer.into();

        let handle = Arc::new(PeerHandle {
            id,
            peer: peer.clone(),
            writer: Mutex::new(Box::new(writer)),
            closed: closed.clone(),
            shut_down: AtomicBool::new(false),
        });
        let reader = PeerReader {
            id,
            peer,
            reader: Box::new(reader),
            closed,
        };
        (handle, reader)
    }
}

/// Write half of a live connection
pub struct PeerHandle {
    id: Uuid,
    peer: String,
    writer: Mutex<BoxedWriter>,
    closed: CancellationToken,
    /// Set once the write side has been shut down
    shut_down: AtomicBool,
}

impl PeerHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Remote address, for logging
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> ConnectionState {
        if self.closed.is_cancelled() {
            ConnectionState::Closed
        } else {
            ConnectionState::Open
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Write one pre-encoded frame.
    ///
    /// Any error leaves the stream in an unknown position; the caller must
    /// close the connection.
    pub async fn send_frame(&self, frame: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(not_connected());
        }

        tokio::select! {
            _ = self.closed.cancelled() => Err(not_connected()),
            result = async {
                let mut writer = self.writer.lock().await;
                write_encoded_frame(&mut *writer, frame).await
            } => result,
        }
    }

    /// Close the connection. Idempotent.
    ///
    /// The connection may already be cancelled through the session token;
    /// the write side is still shut down exactly once.
    pub async fn close(&self) {
        self.closed.cancel();
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!("shutdown of {} failed: {}", self.peer, e);
        }
    }
}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish()
    }
}

/// Read half of a live connection
pub struct PeerReader {
    pub id: Uuid,
    pub peer: String,
    reader: BoxedReader,
    closed: CancellationToken,
}

impl PeerReader {
    /// Receive the next frame.
    ///
    /// Returns [`Error::EndOfStream`] when the peer disconnects or the
    /// connection is closed locally.
    pub async fn recv_frame(&mut self, max_size: usize) -> Result<Vec<u8>> {
        tokio::select! {
            _ = self.closed.cancelled() => Err(Error::EndOfStream),
            result = read_frame(&mut self.reader, max_size) => result,
        }
    }
}

fn not_connected() -> Error {
    Error::Transport(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "connection closed",
    ))
}
