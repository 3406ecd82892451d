//! TCP-based peer synchronization

pub mod client;
pub mod connection;
pub mod framing;
pub mod registry;
pub mod server;
pub(crate) mod session;

pub use connection::{ConnectionState, PeerConnection, PeerHandle, PeerReader};
pub use framing::{encode_frame, read_frame, write_frame};
pub use registry::ConnectionRegistry;
pub use server::SyncServer;
pub use session::{TrafficSnapshot, TrafficStats};
