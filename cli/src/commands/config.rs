//! Settings resolution: config file first, then command-line flags.

use std::path::{Path, PathBuf};

use clap::Args;
use clipbridge_core::protocol::constants::DEFAULT_BIND_HOST;
use clipbridge_core::{Config, Mode, ReconnectPolicy};

/// Flags that override the config file for every command
#[derive(Args, Debug, Default)]
pub struct Overrides {
    /// Config file to read (and write with --save)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Relay mouse and keyboard events as well as the clipboard
    #[arg(long, global = true)]
    pub kvm: bool,

    /// Reconnect this many milliseconds after the server drops us (0 = never)
    #[arg(long, global = true, value_name = "MS")]
    pub reconnect_ms: Option<u64>,

    /// Largest message accepted or sent, in bytes
    #[arg(long, global = true, value_name = "BYTES")]
    pub max_frame_size: Option<usize>,

    /// Write the resulting settings back to the config file
    #[arg(long, global = true)]
    pub save: bool,
}

/// Mode picked on the command line
#[derive(Debug, Clone)]
pub enum Role {
    Server { bind: Option<String>, port: Option<u16> },
    Client { host: String, port: Option<u16> },
}

/// Load the config file, apply the role and flags on top, validate, and
/// optionally save the result.
pub fn resolve_config(overrides: &Overrides, role: Option<Role>) -> anyhow::Result<(Config, PathBuf)> {
    let path = overrides.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_default(&path)?;

    apply(&mut config, overrides, role);
    config.validate()?;

    if overrides.save {
        config.save(&path)?;
        tracing::info!("saved settings to {}", path.display());
    }
    Ok((config, path))
}

/// Print the effective settings.
pub fn show_config(overrides: &Overrides) -> anyhow::Result<()> {
    let (config, path) = resolve_config(overrides, None)?;

    println!("\n\x1b[1mClipbridge settings\x1b[0m");
    println!("═══════════════════════════════════════");
    println!("\x1b[1mFile:\x1b[0m {}{}", path.display(), missing_note(&path));
    println!("{}", serde_json::to_string_pretty(&config)?);
    println!();
    Ok(())
}

fn apply(config: &mut Config, overrides: &Overrides, role: Option<Role>) {
    match role {
        Some(Role::Server { bind, port }) => {
            // A saved client host is not a bind address
            if config.mode != Mode::Server {
                config.host = DEFAULT_BIND_HOST.to_string();
            }
            config.mode = Mode::Server;
            if let Some(bind) = bind {
                config.host = bind;
            }
            if let Some(port) = port {
                config.port = port;
            }
        }
        Some(Role::Client { host, port }) => {
            config.mode = Mode::Client;
            config.host = host;
            if let Some(port) = port {
                config.port = port;
            }
        }
        None => {}
    }

    if overrides.kvm {
        config.kvm_enabled = true;
    }
    if let Some(delay_ms) = overrides.reconnect_ms {
        config.reconnect = match delay_ms {
            0 => ReconnectPolicy::Never,
            delay_ms => ReconnectPolicy::Every { delay_ms },
        };
    }
    if let Some(size) = overrides.max_frame_size {
        config.max_frame_size = size;
    }
}

fn missing_note(path: &Path) -> &'static str {
    if path.exists() {
        ""
    } else {
        " (not created yet, showing defaults)"
    }
}
