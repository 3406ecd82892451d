//! Registry of live peer connections

use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::sync::connection::PeerHandle;

/// Ordered set of open connections.
///
/// The server holds one entry per accepted client; the client holds its
/// single upstream connection. A connection is removed on its first write
/// failure or when its receive loop ends, and never re-added.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    peers: RwLock<Vec<Arc<PeerHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection
    pub async fn add(&self, peer: Arc<PeerHandle>) {
        let mut peers = self.peers.write().await;
        if !peers.iter().any(|p| p.id() == peer.id()) {
            peers.push(peer);
        }
    }

    /// Remove a connection. Removing an unknown id is a no-op.
    ///
    /// Returns the handle if this call was the one that removed it.
    pub async fn remove(&self, id: Uuid) -> Option<Arc<PeerHandle>> {
        let mut peers = self.peers.write().await;
        let index = peers.iter().position(|p| p.id() == id)?;
        Some(peers.remove(index))
    }

    /// Number of registered connections
    pub async fn count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Copy of the current connections, in registration order
    pub async fn snapshot(&self) -> Vec<Arc<PeerHandle>> {
        self.peers.read().await.clone()
    }

    /// Send a pre-encoded frame to every registered connection.
    ///
    /// Iterates a snapshot so concurrent adds and removes cannot skip or
    /// repeat entries. A peer whose write fails is removed and closed, and
    /// delivery continues with the rest. Returns how many peers received
    /// the frame.
    pub async fn broadcast(&self, frame: &[u8]) -> usize {
        let mut delivered = 0;

        for peer in self.snapshot().await {
            match peer.send_frame(frame).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!("send to {} failed, dropping connection: {}", peer.peer(), e);
                    self.remove(peer.id()).await;
                    peer.close().await;
                }
            }
        }

        delivered
    }

    /// Remove and close every connection
    pub async fn close_all(&self) {
        let peers: Vec<_> = self.peers.write().await.drain(..).collect();
        for peer in peers {
            peer.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::MAX_FRAME_SIZE;
    use crate::sync::connection::{PeerConnection, PeerReader};
    use crate::sync::framing::encode_frame;
    use tokio_util::sync::CancellationToken;

    /// A connection handle plus a reader for what arrives at the far end
    fn pipe(shutdown: &CancellationToken, name: &str) -> (Arc<PeerHandle>, PeerReader) {
        let (near, far) = tokio::io::duplex(1024);
        let (near_read, near_write) = tokio::io::split(near);
        let (handle, _local_reader) = PeerConnection::from_parts(near_read, near_write, name, shutdown);

        let (far_read, far_write) = tokio::io::split(far);
        let (_remote_handle, remote_reader) =
            PeerConnection::from_parts(far_read, far_write, format!("{name}-remote"), shutdown);
        (handle, remote_reader)
    }

    #[tokio::test]
    async fn test_add_and_remove() {
        let shutdown = CancellationToken::new();
        let registry = ConnectionRegistry::new();
        let (a, _a_remote) = pipe(&shutdown, "a");
        let (b, _b_remote) = pipe(&shutdown, "b");

        registry.add(a.clone()).await;
        registry.add(b.clone()).await;
        registry.add(a.clone()).await;
        assert_eq!(registry.count().await, 2);

        assert!(registry.remove(a.id()).await.is_some());
        assert!(registry.remove(a.id()).await.is_none());
        assert!(registry.remove(Uuid::new_v4()).await.is_none());
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_broadcast_survives_failed_peer() {
        let shutdown = CancellationToken::new();
        let registry = ConnectionRegistry::new();

        let (first, mut first_remote) = pipe(&shutdown, "first");
        let (second, second_remote) = pipe(&shutdown, "second");
        let (third, mut third_remote) = pipe(&shutdown, "third");

        registry.add(first).await;
        registry.add(second.clone()).await;
        registry.add(third).await;

        // The second peer goes away: its writes now fail
        drop(second_remote);

        let frame = encode_frame(b"payload", MAX_FRAME_SIZE).unwrap();
        let delivered = registry.broadcast(&frame).await;

        assert_eq!(delivered, 2);
        assert_eq!(registry.count().await, 2);
        assert!(second.is_closed());
        assert_eq!(first_remote.recv_frame(MAX_FRAME_SIZE).await.unwrap(), b"payload");
        assert_eq!(third_remote.recv_frame(MAX_FRAME_SIZE).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_removal_during_broadcast_skips_no_one() {
        let shutdown = CancellationToken::new();
        let registry = Arc::new(ConnectionRegistry::new());

        let mut remotes = Vec::new();
        let mut ids = Vec::new();
        for name in ["a", "b", "c", "d"] {
            let (handle, remote) = pipe(&shutdown, name);
            ids.push(handle.id());
            registry.add(handle).await;
            remotes.push(remote);
        }

        // Larger than the pipe buffer, so each send waits for its reader
        let frame = encode_frame(&[7u8; 4096], MAX_FRAME_SIZE).unwrap();
        let broadcast = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.broadcast(&frame).await })
        };

        // Once "a" has its frame the broadcast is under way; drop "d" now
        assert_eq!(remotes[0].recv_frame(MAX_FRAME_SIZE).await.unwrap().len(), 4096);
        assert!(registry.remove(ids[3]).await.is_some());
        assert_eq!(registry.count().await, 3);

        for remote in remotes.iter_mut().skip(1) {
            assert_eq!(remote.recv_frame(MAX_FRAME_SIZE).await.unwrap().len(), 4096);
        }
        assert_eq!(broadcast.await.unwrap(), 4);

        // Later broadcasts see the removal
        let small = encode_frame(b"next", MAX_FRAME_SIZE).unwrap();
        assert_eq!(registry.broadcast(&small).await, 3);
    }

    #[tokio::test]
    async fn test_close_all() {
        let shutdown = CancellationToken::new();
        let registry = ConnectionRegistry::new();
        let (a, _a_remote) = pipe(&shutdown, "a");
        let (b, _b_remote) = pipe(&shutdown, "b");
        registry.add(a.clone()).await;
        registry.add(b.clone()).await;

        registry.close_all().await;

        assert_eq!(registry.count().await, 0);
        assert!(a.is_closed());
        assert!(b.is_closed());
        assert_eq!(registry.broadcast(b"\0\0\0\0").await, 0);
    }
}
