//! End-to-end tests over loopback TCP.
//!
//! Each test runs real server and client sessions (or raw sockets playing a
//! peer) and observes the in-memory clipboards and recorded input on both
//! sides.

use std::sync::Arc;
use std::time::Duration;

use clipbridge_core::protocol::{self, constants::MAX_FRAME_SIZE};
use clipbridge_core::sync::{read_frame, write_frame, ConnectionState};
use clipbridge_core::{
    Config, Decoded, Error, InputEvent, Key, LogReplayer, MemoryClipboard, Payload,
    ReconnectPolicy, RecordingReplayer, ServiceEvent, SessionState, SyncService,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const POLL_MS: u64 = 10;
const WAIT: Duration = Duration::from_secs(5);

fn fast(mut config: Config) -> Config {
    config.poll_interval_ms = POLL_MS;
    config.poll_backoff_ms = POLL_MS;
    config
}

fn server_config() -> Config {
    let mut config = fast(Config::server(0));
    config.host = "127.0.0.1".to_string();
    config
}

async fn start_server(config: Config) -> (SyncService, MemoryClipboard, u16, mpsc::Receiver<ServiceEvent>) {
    let clipboard = MemoryClipboard::new();
    let (mut service, events) = SyncService::new(config, clipboard.clone(), LogReplayer);
    let addr = service.start_server().await.unwrap();
    (service, clipboard, addr.port(), events)
}

async fn start_client(port: u16) -> (SyncService, MemoryClipboard) {
    let clipboard = MemoryClipboard::new();
    let (mut service, _events) =
        SyncService::new(fast(Config::client("127.0.0.1", port)), clipboard.clone(), LogReplayer);
    service.start_client().await.unwrap();
    (service, clipboard)
}

async fn wait_for_peers(service: &SyncService, expected: usize) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while service.peer_count().await != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {} peer(s), have {}",
            expected,
            service.peer_count().await
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Let several poll intervals pass
async fn settle() {
    tokio::time::sleep(Duration::from_millis(POLL_MS * 10)).await;
}

#[tokio::test]
async fn test_server_broadcast_is_applied_and_not_echoed() {
    let (mut server, _server_clip, port, _events) = start_server(server_config()).await;
    let (mut client, client_clip) = start_client(port).await;
    wait_for_peers(&server, 1).await;
    wait_for_peers(&client, 1).await;

    assert_eq!(server.send_clipboard("hello").await.unwrap(), 1);

    wait_until("client clipboard", || client_clip.get() == "hello").await;
    settle().await;

    // The client applied the value but never sent it back upstream
    assert_eq!(server.stats().frames_in, 0);
    assert_eq!(client.stats().frames_out, 0);
    assert_eq!(client.last_clipboard(), "hello");

    client.stop().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_local_change_reaches_server() {
    let (mut server, server_clip, port, _events) = start_server(server_config()).await;
    let (mut client, client_clip) = start_client(port).await;
    wait_for_peers(&server, 1).await;
    wait_for_peers(&client, 1).await;

    client_clip.set("copied on the client");
    wait_until("server clipboard", || server_clip.get() == "copied on the client").await;
    settle().await;

    // One frame up, nothing echoed back down
    assert_eq!(client.stats().frames_out, 1);
    assert_eq!(client.stats().frames_in, 0);

    client.stop().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_legacy_plaintext_peer_interoperates() {
    let (mut server, server_clip, port, _events) = start_server(server_config()).await;
    let mut legacy = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    wait_for_peers(&server, 1).await;

    // An old peer sends bare text
    write_frame(&mut legacy, "plain text, no envelope".as_bytes(), MAX_FRAME_SIZE)
        .await
        .unwrap();
    wait_until("legacy text applied", || server_clip.get() == "plain text, no envelope").await;

    // and receives the structured envelope
    server.send_clipboard("reply").await.unwrap();
    let frame = read_frame(&mut legacy, MAX_FRAME_SIZE).await.unwrap();
    assert_eq!(
        protocol::decode(&frame),
        Decoded::Structured(Payload::Clipboard("reply".to_string()))
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_dead_client_does_not_block_others() {
    let (mut server, _server_clip, port, _events) = start_server(server_config()).await;

    let mut first = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let second = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut third = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    wait_for_peers(&server, 3).await;

    drop(second);
    wait_for_peers(&server, 2).await;

    assert_eq!(server.send_clipboard("still here").await.unwrap(), 2);
    for stream in [&mut first, &mut third] {
        let frame = read_frame(stream, MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(
            protocol::decode(&frame),
            Decoded::Structured(Payload::Clipboard("still here".to_string()))
        );
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_closes_connections_promptly() {
    let (mut server, _server_clip, port, _events) = start_server(server_config()).await;
    let mut peer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    wait_for_peers(&server, 1).await;

    tokio::time::timeout(Duration::from_secs(1), server.stop())
        .await
        .expect("stop should not hang")
        .unwrap();

    assert_eq!(server.state(), SessionState::Stopped);
    assert_eq!(server.peer_count().await, 0);
    assert!(!server.is_running());

    let result = tokio::time::timeout(WAIT, read_frame(&mut peer, MAX_FRAME_SIZE))
        .await
        .unwrap();
    assert!(result.is_err());

    // Stopping twice is an error, and so is sending after stop
    assert!(matches!(server.stop().await, Err(Error::NotRunning)));
    assert!(matches!(server.send_clipboard("x").await, Err(Error::NotRunning)));
}

#[tokio::test]
async fn test_client_disconnect_is_terminal_by_default() {
    let (mut server, _server_clip, port, _events) = start_server(server_config()).await;
    let (client, _client_clip) = start_client(port).await;
    wait_for_peers(&server, 1).await;
    wait_until("client open", || client.state() == SessionState::Client(ConnectionState::Open)).await;

    server.stop().await.unwrap();

    wait_until("client closed", || {
        client.state() == SessionState::Client(ConnectionState::Closed)
    })
    .await;
    assert_eq!(client.peer_count().await, 0);
}

#[tokio::test]
async fn test_client_reconnects_when_configured() {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut config = fast(Config::client("127.0.0.1", port));
    config.reconnect = ReconnectPolicy::Every { delay_ms: 20 };
    let client_clip = MemoryClipboard::new();
    let (mut client, _events) = SyncService::new(config, client_clip.clone(), LogReplayer);
    client.start_client().await.unwrap();

    // First connection: accept, then hang up
    let (first, _) = listener.accept().await.unwrap();
    drop(first);

    // The client comes back on its own
    let (mut second, _) = tokio::time::timeout(WAIT, listener.accept()).await.unwrap().unwrap();

    let bytes = protocol::encode(&Payload::Clipboard("after reconnect".to_string())).unwrap();
    write_frame(&mut second, &bytes, MAX_FRAME_SIZE).await.unwrap();
    wait_until("clipboard after reconnect", || client_clip.get() == "after reconnect").await;

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_input_relay_and_control_toggle() {
    let mut server_config = server_config();
    server_config.kvm_enabled = true;
    let (mut server, _server_clip, port, _events) = start_server(server_config).await;

    let replayer = Arc::new(RecordingReplayer::new());
    let mut client_config = fast(Config::client("127.0.0.1", port));
    client_config.kvm_enabled = true;
    let (mut client, _client_events) =
        SyncService::new(client_config, MemoryClipboard::new(), replayer.clone());
    client.start_client().await.unwrap();
    wait_for_peers(&server, 1).await;
    wait_for_peers(&client, 1).await;

    let moved = InputEvent::MouseMove { x: 0.5, y: 0.25 };
    let pressed = InputEvent::KeyPress { key: Key::char('x') };
    assert_eq!(server.forward_local_input(moved.clone()).await.unwrap(), 1);
    assert_eq!(server.forward_local_input(pressed.clone()).await.unwrap(), 1);
    wait_until("events replayed", || replayer.events().len() == 2).await;
    assert_eq!(replayer.events(), vec![moved, pressed]);

    // Hand control to the client
    server.toggle_control().await.unwrap();
    assert!(!server.is_controlling());
    assert_eq!(
        server
            .forward_local_input(InputEvent::MouseScroll { dx: 0, dy: 1 })
            .await
            .unwrap(),
        0
    );
    settle().await;
    assert!(client.is_controlling());
    assert_eq!(replayer.events().len(), 2);

    client.stop().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_failures_leave_service_stopped() {
    // Nothing listens on the port a just-closed listener had
    let port = {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let (mut client, _events) =
        SyncService::new(fast(Config::client("127.0.0.1", port)), MemoryClipboard::new(), LogReplayer);
    assert!(matches!(client.start_client().await, Err(Error::Connect { .. })));
    assert!(!client.is_running());
    assert_eq!(client.state(), SessionState::Stopped);

    // A port already taken cannot be bound twice
    let (mut first, _clip, port, _events) = start_server(server_config()).await;
    let mut taken = server_config();
    taken.port = port;
    let (mut second, _events2) = SyncService::new(taken, MemoryClipboard::new(), LogReplayer);
    assert!(matches!(second.start_server().await, Err(Error::Bind { .. })));
    assert!(!second.is_running());

    assert!(matches!(first.start_server().await, Err(Error::AlreadyRunning)));
    first.stop().await.unwrap();
}

#[tokio::test]
async fn test_events_report_peers() {
    let (mut server, _server_clip, port, mut events) = start_server(server_config()).await;
    let peer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    wait_for_peers(&server, 1).await;
    drop(peer);
    wait_for_peers(&server, 0).await;
    server.stop().await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }

    assert!(matches!(seen.first(), Some(ServiceEvent::StateChanged(SessionState::Listening(_)))));
    assert!(seen.iter().any(|e| matches!(e, ServiceEvent::PeerConnected { peers: 1, .. })));
    assert_eq!(
        seen.iter()
            .filter(|e| matches!(e, ServiceEvent::PeerDisconnected { peers: 0, .. }))
            .count(),
        1
    );
    assert_eq!(seen.last(), Some(&ServiceEvent::StateChanged(SessionState::Stopped)));
}
