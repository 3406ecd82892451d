//! Clipbridge Core - clipboard and input sync over a framed TCP protocol
//!
//! One device runs as the server and any number of others connect to it as
//! clients. Every message is a length-prefixed frame carrying either a JSON
//! envelope (`{"protocol": "clipboard" | "kvm", "data": ...}`) or, for older
//! peers, bare clipboard text.

pub mod clipboard;
pub mod config;
pub mod input;
pub mod net;
pub mod protocol;
pub mod service;
pub mod sync;

mod error;

pub use error::{Error, Result};

// Re-export key types for convenience
pub use clipboard::{ClipboardBackend, ClipboardState, MemoryClipboard, SystemClipboard};
pub use config::{Config, Mode, ReconnectPolicy};
pub use input::{HotkeyDetector, InputRelay, InputReplayer, LogReplayer, RecordingReplayer};
pub use protocol::{Decoded, InputEvent, Key, Payload};
pub use service::{ServiceEvent, SessionState, SyncService};
