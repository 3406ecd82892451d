//! TCP server for accepting peer connections

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::sync::connection::PeerConnection;
use crate::sync::session::{run_receive_loop, Lifecycle, SessionContext};
use crate::{Error, Result};

/// Pause after a failed accept so a persistent error cannot spin the loop
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// TCP sync server
pub struct SyncServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl SyncServer {
    /// Bind to `host:port` and create the server
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| Error::Bind {
                addr: format!("{}:{}", host, port),
                source,
            })?;

        let local_addr = listener.local_addr()?;
        tracing::info!("sync server listening on {}", local_addr);
        for addr in crate::net::connect_addresses(local_addr) {
            tracing::info!("clients can connect to {}", addr);
        }

        Ok(Self { listener, local_addr })
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until shutdown.
    ///
    /// Every accepted connection is registered and gets its own receive
    /// loop, tracked by the session so a stop waits for it.
    pub(crate) async fn run(self, ctx: Arc<SessionContext>, life: Lifecycle) {
        loop {
            tokio::select! {
                _ = life.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        tracing::debug!("incoming connection from {}", addr);
                        let (peer, reader) = PeerConnection::from_tcp(stream, &life.shutdown);
                        ctx.register(peer.clone()).await;
                        life.tasks.spawn(run_receive_loop(ctx.clone(), peer, reader));
                    }
                    Err(e) => {
                        tracing::error!("accept error: {}", e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        tracing::info!("sync server on {} stopped", self.local_addr);
    }
}
