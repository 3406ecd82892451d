//! Shared session state, message dispatch and the per-connection receive loop

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::clipboard::ClipboardState;
use crate::input::{InputRelay, RemoteInput};
use crate::protocol::{self, Decoded, InputEvent, Payload};
use crate::service::{ServiceEvent, SessionState};
use crate::sync::connection::{PeerHandle, PeerReader};
use crate::sync::framing::encode_frame;
use crate::sync::registry::ConnectionRegistry;
use crate::Result;

/// Frame counters for status reporting
#[derive(Debug, Default)]
pub struct TrafficStats {
    frames_in: AtomicU64,
    frames_out: AtomicU64,
    unknown: AtomicU64,
    malformed: AtomicU64,
}

/// Point-in-time copy of [`TrafficStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficSnapshot {
    pub frames_in: u64,
    /// Frames delivered, counted once per receiving peer
    pub frames_out: u64,
    pub unknown: u64,
    pub malformed: u64,
}

impl TrafficStats {
    pub fn snapshot(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// Shutdown signal plus the tasks that must finish before a stop completes.
/// One per started session.
#[derive(Clone, Default)]
pub(crate) struct Lifecycle {
    pub shutdown: CancellationToken,
    pub tasks: TaskTracker,
}

/// State shared by every loop of a session
pub(crate) struct SessionContext {
    pub registry: ConnectionRegistry,
    pub clipboard: Arc<ClipboardState>,
    pub input: InputRelay,
    pub stats: TrafficStats,
    pub max_frame_size: usize,
    state: Mutex<SessionState>,
    events: mpsc::Sender<ServiceEvent>,
}

impl SessionContext {
    pub fn new(
        clipboard: ClipboardState,
        input: InputRelay,
        max_frame_size: usize,
        events: mpsc::Sender<ServiceEvent>,
    ) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            clipboard: Arc::new(clipboard),
            input,
            stats: TrafficStats::default(),
            max_frame_size,
            state: Mutex::new(SessionState::Stopped),
            events,
        }
    }

    /// Hand an event to the control layer without ever blocking a loop on
    /// a slow consumer.
    pub fn emit(&self, event: ServiceEvent) {
        if let Err(e) = self.events.try_send(event) {
            tracing::debug!("service event dropped: {}", e);
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_state(&self, state: SessionState) {
        let changed = {
            let mut current = self.state.lock().unwrap_or_else(|p| p.into_inner());
            let changed = *current != state;
            *current = state;
            changed
        };
        if changed {
            self.emit(ServiceEvent::StateChanged(state));
        }
    }

    /// Encode a payload and send it to every connected peer.
    ///
    /// Returns the number of peers that received it.
    pub async fn broadcast(&self, payload: &Payload) -> Result<usize> {
        let bytes = protocol::encode(payload)?;
        let frame = encode_frame(&bytes, self.max_frame_size)?;
        let delivered = self.registry.broadcast(&frame).await;
        self.stats.frames_out.fetch_add(delivered as u64, Ordering::Relaxed);
        Ok(delivered)
    }

    /// Send a clipboard value the poller picked up locally
    pub async fn send_local_clipboard(&self, text: String) {
        let len = text.chars().count();
        match self.broadcast(&Payload::Clipboard(text)).await {
            Ok(0) => tracing::debug!("no peers connected, clipboard change not sent"),
            Ok(peers) => {
                tracing::info!("sent clipboard ({} chars) to {} peer(s)", len, peers);
                self.emit(ServiceEvent::ClipboardSent { peers, chars: len });
            }
            Err(e) => {
                tracing::warn!("failed to send clipboard: {}", e);
                self.emit(ServiceEvent::Error(e.to_string()));
            }
        }
    }

    pub async fn register(&self, peer: Arc<PeerHandle>) {
        self.registry.add(peer.clone()).await;
        let peers = self.registry.count().await;
        tracing::info!("peer connected: {} ({} total)", peer.peer(), peers);
        self.emit(ServiceEvent::PeerConnected {
            id: peer.id(),
            peer: peer.peer().to_string(),
            peers,
        });
    }

    /// Remove and close a connection whose receive loop has ended.
    pub async fn release(&self, peer: &PeerHandle) {
        self.registry.remove(peer.id()).await;
        peer.close().await;
        let peers = self.registry.count().await;
        tracing::info!("peer disconnected: {} ({} remaining)", peer.peer(), peers);
        self.emit(ServiceEvent::PeerDisconnected {
            id: peer.id(),
            peers,
        });
    }

    /// Decode one frame and route it.
    pub async fn dispatch(&self, from: Uuid, frame: &[u8]) {
        self.stats.frames_in.fetch_add(1, Ordering::Relaxed);

        match protocol::decode(frame) {
            Decoded::Structured(Payload::Clipboard(text)) => self.apply_clipboard(from, text),
            Decoded::Legacy(text) if text.is_empty() => {
                tracing::debug!("empty legacy frame from {}, ignored", from);
            }
            Decoded::Legacy(text) => {
                tracing::debug!("legacy plaintext frame from {}", from);
                self.apply_clipboard(from, text);
            }
            Decoded::Structured(Payload::Kvm(event)) => self.apply_input(from, event),
            Decoded::Unknown { protocol } => {
                self.stats.unknown.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("ignoring message with unknown protocol {:?} from {}", protocol, from);
                self.emit(ServiceEvent::UnknownMessage { from, protocol });
            }
            Decoded::Malformed { protocol, reason } => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("malformed {} message from {}: {}", protocol, from, reason);
            }
        }
    }

    fn apply_clipboard(&self, from: Uuid, text: String) {
        match self.clipboard.apply_remote(&text) {
            Ok(true) => {
                tracing::info!("clipboard updated from {} ({} chars)", from, text.chars().count());
                self.emit(ServiceEvent::ClipboardReceived { from, text });
            }
            Ok(false) => tracing::debug!("clipboard from {} already current", from),
            Err(e) => {
                tracing::warn!("failed to apply clipboard from {}: {}", from, e);
                self.emit(ServiceEvent::Error(e.to_string()));
            }
        }
    }

    fn apply_input(&self, from: Uuid, event: InputEvent) {
        match self.input.handle_remote_event(&event) {
            Ok(RemoteInput::ControlChanged(controlling)) => {
                self.emit(ServiceEvent::ControlChanged { controlling });
            }
            Ok(RemoteInput::Unknown) => {
                self.stats.unknown.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("ignoring unknown input event from {}", from);
                self.emit(ServiceEvent::UnknownMessage {
                    from,
                    protocol: "kvm".to_string(),
                });
            }
            Ok(RemoteInput::Ignored) => {
                tracing::debug!("input relay disabled, dropped {} from {}", event.kind(), from);
            }
            Ok(RemoteInput::Replayed) => {}
            Err(e) => tracing::warn!("failed to replay {} from {}: {}", event.kind(), from, e),
        }
    }
}

/// Read and dispatch frames until the connection ends, then release it.
///
/// Frames from one connection are dispatched strictly in arrival order.
pub(crate) async fn run_receive_loop(ctx: Arc<SessionContext>, peer: Arc<PeerHandle>, mut reader: PeerReader) {
    loop {
        match reader.recv_frame(ctx.max_frame_size).await {
            Ok(frame) => ctx.dispatch(peer.id(), &frame).await,
            Err(e) if e.is_disconnect() => {
                tracing::debug!("connection to {} ended: {}", reader.peer, e);
                break;
            }
            Err(e) => {
                tracing::warn!("connection to {} failed: {}", reader.peer, e);
                break;
            }
        }
    }

    ctx.release(&peer).await;
}
