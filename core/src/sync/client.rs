//! Outbound connection to a sync server

use std::sync::Arc;

use tokio::net::TcpStream;

use crate::config::ReconnectPolicy;
use crate::service::SessionState;
use crate::sync::connection::{ConnectionState, PeerConnection};
use crate::sync::session::{run_receive_loop, Lifecycle, SessionContext};
use crate::{Error, Result};

/// Open a TCP connection to `host:port`
pub async fn connect(host: &str, port: u16) -> Result<TcpStream> {
    TcpStream::connect((host, port))
        .await
        .map_err(|source| Error::Connect {
            addr: format!("{}:{}", host, port),
            source,
        })
}

/// Drive the client's single connection, starting from an already
/// connected stream.
///
/// With [`ReconnectPolicy::Never`] the session ends when the connection
/// does. Otherwise a new connection is attempted after each drop, until
/// shutdown.
pub(crate) async fn run_client(
    ctx: Arc<SessionContext>,
    life: Lifecycle,
    host: String,
    port: u16,
    policy: ReconnectPolicy,
    stream: TcpStream,
) {
    let mut next = Some(stream);

    while let Some(stream) = next.take() {
        let (peer, reader) = PeerConnection::from_tcp(stream, &life.shutdown);
        ctx.register(peer.clone()).await;
        ctx.set_state(SessionState::Client(ConnectionState::Open));

        run_receive_loop(ctx.clone(), peer, reader).await;

        if life.shutdown.is_cancelled() {
            break;
        }
        ctx.set_state(SessionState::Client(ConnectionState::Closed));

        let Some(delay) = policy.delay() else {
            tracing::info!("connection to {}:{} lost, not reconnecting", host, port);
            break;
        };

        ctx.set_state(SessionState::Client(ConnectionState::Connecting));
        next = loop {
            tokio::select! {
                _ = life.shutdown.cancelled() => break None,
                _ = tokio::time::sleep(delay) => {}
            }
            let attempt = tokio::select! {
                _ = life.shutdown.cancelled() => break None,
                attempt = connect(&host, port) => attempt,
            };
            match attempt {
                Ok(stream) => {
                    tracing::info!("reconnected to {}:{}", host, port);
                    break Some(stream);
                }
                Err(e) => tracing::warn!("reconnect failed: {}", e),
            }
        };
    }
}
