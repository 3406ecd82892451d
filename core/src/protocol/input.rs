//! Input-device events relayed between peers

use serde::{Deserialize, Serialize};

/// A single mouse or keyboard event, or a change of control.
///
/// Serialized with a `type` tag, e.g.
/// `{"type":"mouse_click","button":"left","pressed":true}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    /// Pointer position as a fraction of the sender's screen (0.0..=1.0).
    MouseMove { x: f64, y: f64 },
    MouseClick { button: String, pressed: bool },
    MouseScroll { dx: i32, dy: i32 },
    KeyPress { key: Key },
    KeyRelease { key: Key },
    /// Tells the receiver whether it now holds control.
    ControlChange { controlling: bool },
    /// Any `type` this build does not know about.
    #[serde(other)]
    Unknown,
}

/// A key, either a printable character or a named special key.
///
/// Serialized as `{"type":"char","value":"a"}` or
/// `{"type":"special","value":"shift"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Key {
    Char(String),
    Special(String),
}

impl Key {
    pub fn char(c: char) -> Self {
        Key::Char(c.to_string())
    }

    pub fn special(name: &str) -> Self {
        Key::Special(name.to_string())
    }
}

/// Absolute pointer position on the local screen, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenPosition {
    pub x: i32,
    pub y: i32,
}

impl InputEvent {
    /// Build a `MouseMove` from absolute pixel coordinates on a screen of the
    /// given size, normalizing to screen fractions.
    pub fn mouse_move_from_pixels(x: f64, y: f64, width: u32, height: u32) -> Self {
        let fraction = |v: f64, extent: u32| {
            if extent == 0 {
                0.0
            } else {
                (v / f64::from(extent)).clamp(0.0, 1.0)
            }
        };
        InputEvent::MouseMove {
            x: fraction(x, width),
            y: fraction(y, height),
        }
    }

    /// Map a `MouseMove` back onto a local screen of the given size.
    ///
    /// Returns `None` for every other event kind.
    pub fn screen_position(&self, width: u32, height: u32) -> Option<ScreenPosition> {
        match *self {
            InputEvent::MouseMove { x, y } => {
                let to_pixels = |v: f64, extent: u32| {
                    let max = extent.saturating_sub(1) as f64;
                    (v.clamp(0.0, 1.0) * f64::from(extent)).min(max).max(0.0) as i32
                };
                Some(ScreenPosition {
                    x: to_pixels(x, width),
                    y: to_pixels(y, height),
                })
            }
            _ => None,
        }
    }

    /// The wire tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            InputEvent::MouseMove { .. } => "mouse_move",
            InputEvent::MouseClick { .. } => "mouse_click",
            InputEvent::MouseScroll { .. } => "mouse_scroll",
            InputEvent::KeyPress { .. } => "key_press",
            InputEvent::KeyRelease { .. } => "key_release",
            InputEvent::ControlChange { .. } => "control_change",
            InputEvent::Unknown => "unknown",
        }
    }
}
