use thiserror::Error;

/// Clipbridge error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Peer closed the connection")]
    EndOfStream,

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Failed to serialize/deserialize: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Clipboard error: {0}")]
    Clipboard(String),

    #[error("Input error: {0}")]
    Input(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Session already running")]
    AlreadyRunning,

    #[error("Session not running")]
    NotRunning,
}

impl Error {
    /// Whether this error means the peer went away rather than misbehaved.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::EndOfStream | Error::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
