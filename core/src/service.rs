//! High-level clipbridge service that coordinates all components
//!
//! This is the surface a control layer (CLI, GUI, tray) drives: start a
//! server or client session, stop it, push clipboard text or input events,
//! and watch [`ServiceEvent`]s for status.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::clipboard::{self, ClipboardBackend, ClipboardState};
use crate::config::{Config, Mode};
use crate::input::{InputRelay, InputReplayer};
use crate::protocol::{InputEvent, Payload};
use crate::sync::client;
use crate::sync::connection::ConnectionState;
use crate::sync::server::SyncServer;
use crate::sync::session::{Lifecycle, SessionContext, TrafficSnapshot};
use crate::{Error, Result};

/// How long `stop` waits for loops to wind down
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Capacity of the event channel; events beyond it are dropped
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Where the service is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    /// Server accepting connections on this address
    Listening(SocketAddr),
    /// Client, with the state of its upstream connection
    Client(ConnectionState),
}

/// Events emitted by the clipbridge service
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    StateChanged(SessionState),
    PeerConnected { id: Uuid, peer: String, peers: usize },
    PeerDisconnected { id: Uuid, peers: usize },
    /// Clipboard was updated from another device
    ClipboardReceived { from: Uuid, text: String },
    /// Our clipboard was sent to other devices
    ClipboardSent { peers: usize, chars: usize },
    /// Input control moved; `controlling` is this device's new state
    ControlChanged { controlling: bool },
    /// A peer sent a protocol or event type we do not speak
    UnknownMessage { from: Uuid, protocol: String },
    Error(String),
}

/// Main clipbridge service
pub struct SyncService {
    config: Config,
    ctx: Arc<SessionContext>,
    session: Option<Lifecycle>,
}

impl SyncService {
    /// Create the service and its event channel.
    pub fn new(
        config: Config,
        clipboard: impl ClipboardBackend + 'static,
        replayer: impl InputReplayer + 'static,
    ) -> (Self, mpsc::Receiver<ServiceEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let ctx = SessionContext::new(
            ClipboardState::new(clipboard),
            InputRelay::new(replayer, config.kvm_enabled),
            config.max_frame_size,
            tx,
        );

        let service = Self {
            config,
            ctx: Arc::new(ctx),
            session: None,
        };
        (service, rx)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn state(&self) -> SessionState {
        self.ctx.state()
    }

    pub async fn peer_count(&self) -> usize {
        self.ctx.registry.count().await
    }

    pub fn stats(&self) -> TrafficSnapshot {
        self.ctx.stats.snapshot()
    }

    /// Last clipboard value seen or applied
    pub fn last_clipboard(&self) -> String {
        self.ctx.clipboard.last_seen()
    }

    /// Start in the configured mode.
    pub async fn start(&mut self) -> Result<()> {
        match self.config.mode {
            Mode::Server => self.start_server().await.map(|_| ()),
            Mode::Client => self.start_client().await,
        }
    }

    /// Listen for clients. Returns the bound address.
    ///
    /// A bind failure is returned once and leaves the service stopped.
    pub async fn start_server(&mut self) -> Result<SocketAddr> {
        self.ensure_startable()?;

        let server = SyncServer::bind(&self.config.host, self.config.port).await?;
        let addr = server.local_addr();

        let life = Lifecycle::default();
        life.tasks.spawn(server.run(self.ctx.clone(), life.clone()));
        self.spawn_poller(&life);

        self.ctx.set_state(SessionState::Listening(addr));
        self.session = Some(life);
        Ok(addr)
    }

    /// Connect to the configured server.
    ///
    /// A connect failure is returned once and leaves the service stopped;
    /// the reconnect policy only applies to drops after a successful start.
    pub async fn start_client(&mut self) -> Result<()> {
        self.ensure_startable()?;

        let host = self.config.host.clone();
        let port = self.config.port;
        self.ctx.set_state(SessionState::Client(ConnectionState::Connecting));
        tracing::info!("connecting to {}:{}", host, port);

        let stream = match client::connect(&host, port).await {
            Ok(stream) => stream,
            Err(e) => {
                self.ctx.set_state(SessionState::Stopped);
                return Err(e);
            }
        };

        let life = Lifecycle::default();
        life.tasks.spawn(client::run_client(
            self.ctx.clone(),
            life.clone(),
            host,
            port,
            self.config.reconnect,
            stream,
        ));
        self.spawn_poller(&life);

        self.session = Some(life);
        Ok(())
    }

    /// Stop the session: cancel every loop, close every connection, and
    /// wait for the loops to finish.
    pub async fn stop(&mut self) -> Result<()> {
        let life = self.session.take().ok_or(Error::NotRunning)?;
        tracing::info!("stopping sync session");

        life.shutdown.cancel();
        self.ctx.registry.close_all().await;

        life.tasks.close();
        if tokio::time::timeout(STOP_TIMEOUT, life.tasks.wait()).await.is_err() {
            tracing::warn!("{} session task(s) still running after stop", life.tasks.len());
        }

        self.ctx.set_state(SessionState::Stopped);
        Ok(())
    }

    /// Send clipboard text to every peer. Returns how many received it.
    pub async fn send_clipboard(&self, text: &str) -> Result<usize> {
        self.ensure_running()?;
        self.ctx.broadcast(&Payload::Clipboard(text.to_string())).await
    }

    /// Send an input event to every peer, regardless of who has control.
    pub async fn send_input(&self, event: InputEvent) -> Result<usize> {
        self.ensure_running()?;
        self.ctx.broadcast(&Payload::Kvm(event)).await
    }

    /// Forward an event captured by the local input hook, if this device
    /// currently has control. Returns how many peers received it.
    pub async fn forward_local_input(&self, event: InputEvent) -> Result<usize> {
        if !self.ctx.input.should_forward(&event) {
            return Ok(0);
        }
        self.send_input(event).await
    }

    /// Flip input control and tell the peer.
    pub async fn toggle_control(&self) -> Result<usize> {
        self.ensure_running()?;
        let event = self.ctx.input.toggle_control();
        self.ctx.emit(ServiceEvent::ControlChanged {
            controlling: self.ctx.input.is_controlling(),
        });
        self.send_input(event).await
    }

    pub fn set_input_enabled(&self, enabled: bool) {
        self.ctx.input.set_enabled(enabled);
        tracing::info!("input relay {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn is_controlling(&self) -> bool {
        self.ctx.input.is_controlling()
    }

    fn spawn_poller(&self, life: &Lifecycle) {
        let ctx = self.ctx.clone();
        life.tasks.spawn(clipboard::run_poller(
            self.ctx.clipboard.clone(),
            self.config.poll_settings(),
            life.shutdown.clone(),
            move |text| {
                let ctx = ctx.clone();
                async move { ctx.send_local_clipboard(text).await }
            },
        ));
    }

    fn ensure_startable(&self) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::AlreadyRunning);
        }
        self.config.validate()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.session.is_none() {
            return Err(Error::NotRunning);
        }
        Ok(())
    }
}
