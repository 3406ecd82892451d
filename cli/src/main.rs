//! Clipbridge CLI - clipboard (and input) sync between machines.

mod commands;
mod ui;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{Overrides, Role};

#[derive(Parser)]
#[command(name = "clipbridge")]
#[command(about = "Share the clipboard between machines over TCP", long_about = None)]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept clients and sync with all of them
    Server {
        /// Interface to listen on
        #[arg(long)]
        bind: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Connect to a server
    Client {
        /// Server address or hostname
        #[arg(long)]
        host: String,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show the effective settings
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("clipbridge=info".parse()?))
        .init();

    let cli = Cli::parse();

    let role = match cli.command {
        Commands::Server { bind, port } => Role::Server { bind, port },
        Commands::Client { host, port } => Role::Client { host, port },
        Commands::Config => return commands::show_config(&cli.overrides),
    };

    let (config, _) = commands::resolve_config(&cli.overrides, Some(role))?;
    commands::run_service(config).await
}
