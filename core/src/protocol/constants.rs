//! Wire and timing constants shared by the transport, codec and poller
//!
//! Values that can be overridden at runtime live in `Config`; these are
//! the defaults.

/// Default TCP port for the sync server
pub const DEFAULT_PORT: u16 = 5555;

/// Default interface the server binds to
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Size of the big-endian length prefix in front of every frame
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum frame payload size (10 MB)
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Upper bound on a single socket read while accumulating a payload
pub const READ_CHUNK_SIZE: usize = 4096;

/// Envelope tag for clipboard payloads
pub const PROTOCOL_CLIPBOARD: &str = "clipboard";

/// Envelope tag for input-event payloads
pub const PROTOCOL_KVM: &str = "kvm";

/// Clipboard polling interval in milliseconds
pub const CLIPBOARD_POLL_INTERVAL_MS: u64 = 500;

/// Back-off after a failed clipboard read, in milliseconds
pub const CLIPBOARD_ERROR_BACKOFF_MS: u64 = 1000;
