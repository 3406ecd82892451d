//! Run command implementation.

use clipbridge_core::sync::ConnectionState;
use clipbridge_core::{
    Config, LogReplayer, Mode, ReconnectPolicy, ServiceEvent, SessionState, SyncService,
    SystemClipboard,
};

use crate::ui::print_banner;

/// Run a server or client session until Ctrl+C, or until a client's
/// connection drops with reconnecting turned off.
pub async fn run_service(config: Config) -> anyhow::Result<()> {
    print_banner(config.mode);

    let (mut service, mut events) = SyncService::new(config, SystemClipboard::new(), LogReplayer);

    match service.config().mode {
        Mode::Server => {
            let addr = service.start_server().await?;
            println!("\x1b[1mListening:\x1b[0m {}", addr);
            let reachable = clipbridge_core::net::connect_addresses(addr);
            if reachable.is_empty() {
                println!("\x1b[2mNo network interface found; clients on this machine can use 127.0.0.1\x1b[0m");
            } else {
                println!("\x1b[1mClients connect with:\x1b[0m");
            }
            for target in reachable {
                println!(
                    "    clipbridge client --host {} --port {}",
                    target.ip(),
                    target.port()
                );
            }
        }
        Mode::Client => {
            service.start_client().await?;
            println!(
                "\x1b[1mServer:\x1b[0m    {}:{}",
                service.config().host,
                service.config().port
            );
        }
    }
    if let Some(note) = input_relay_note(service.config().kvm_enabled) {
        println!("\x1b[1mInput:\x1b[0m     {}", note);
    }

    println!("\x1b[1;32m✓\x1b[0m Syncing clipboard changes...");
    println!("\x1b[2mPress Ctrl+C to stop.\x1b[0m\n");

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
    ctrlc::set_handler(move || {
        let _ = tx.blocking_send(());
    })?;

    let ends_on_disconnect = service.config().mode == Mode::Client
        && service.config().reconnect == ReconnectPolicy::Never;

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                let closed = event == ServiceEvent::StateChanged(SessionState::Client(ConnectionState::Closed));
                handle_event(event);
                if closed && ends_on_disconnect {
                    println!("\x1b[2mNot reconnecting (use --reconnect-ms to stay connected).\x1b[0m");
                    break;
                }
            }
            _ = rx.recv() => {
                println!("\n\x1b[1;33mShutting down...\x1b[0m");
                break;
            }
        }
    }

    service.stop().await?;
    let stats = service.stats();
    println!(
        "\x1b[2m{} message(s) received, {} sent, {} unknown, {} malformed\x1b[0m",
        stats.frames_in, stats.frames_out, stats.unknown, stats.malformed
    );
    Ok(())
}

/// Handle a service event and print appropriate output.
fn handle_event(event: ServiceEvent) {
    match event {
        ServiceEvent::StateChanged(state) => match state {
            SessionState::Client(ConnectionState::Connecting) => {
                println!("\x1b[1;33m⬤\x1b[0m Connecting...");
            }
            SessionState::Client(ConnectionState::Open) => {
                println!("\x1b[1;32m⬤\x1b[0m Connected to server");
            }
            SessionState::Client(ConnectionState::Closed) => {
                println!("\x1b[1;31m⬤\x1b[0m Connection to server closed");
            }
            SessionState::Listening(_) | SessionState::Stopped => {}
        },
        ServiceEvent::PeerConnected { peer, peers, .. } => {
            println!("\x1b[1;32m⬤\x1b[0m Peer: \x1b[1m{}\x1b[0m ({} connected)", peer, peers);
        }
        ServiceEvent::PeerDisconnected { id, peers } => {
            println!("\x1b[1;31m⬤\x1b[0m Lost: {} ({} connected)", id, peers);
        }
        ServiceEvent::ClipboardReceived { from, text } => {
            println!("\x1b[1;34m📋\x1b[0m Received from {}: \"{}\"", from, format_preview(&text));
        }
        ServiceEvent::ClipboardSent { peers, chars } => {
            println!("\x1b[1;34m📤\x1b[0m Sent {} chars to {} peer(s)", chars, peers);
        }
        ServiceEvent::ControlChanged { controlling } => {
            if controlling {
                println!("\x1b[1;35m⚡\x1b[0m This machine now has input control");
            } else {
                println!("\x1b[1;35m⚡\x1b[0m Input control handed to the other machine");
            }
        }
        ServiceEvent::UnknownMessage { from, protocol } => {
            println!("\x1b[2m? Ignored '{}' message from {}\x1b[0m", protocol, from);
        }
        ServiceEvent::Error(e) => {
            eprintln!("\x1b[1;31m✗\x1b[0m Error: {}", e);
        }
    }
}

/// What the input relay does in this binary. It has no capture hook and
/// replays remote events only into the log.
fn input_relay_note(kvm_enabled: bool) -> Option<&'static str> {
    kvm_enabled.then_some("relay enabled (no local input hook; remote events are only logged)")
}

/// Format clipboard text for preview display.
fn format_preview(text: &str) -> String {
    const MAX_PREVIEW_CHARS: usize = 50;

    let flat = text.replace(['\n', '\r'], " ");
    if flat.chars().count() > MAX_PREVIEW_CHARS {
        let cut: String = flat.chars().take(MAX_PREVIEW_CHARS).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}
