//! Envelope codec and input-event types carried over the wire

pub mod constants;
mod input;
mod messages;

pub use input::{InputEvent, Key, ScreenPosition};
pub use messages::{decode, encode, Decoded, Payload};
