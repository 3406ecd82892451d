//! Input-event relay: who controls, what gets forwarded, what gets replayed
//!
//! Capturing and injecting real device events is the job of an OS hook
//! outside this crate. It reports local events to
//! [`InputRelay::should_forward`] and receives remote ones through an
//! [`InputReplayer`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::protocol::{InputEvent, Key};
use crate::Result;

/// Reproduces remote input on this machine.
pub trait InputReplayer: Send + Sync {
    fn replay(&self, event: &InputEvent) -> Result<()>;
}

/// Replayer that only logs, for hosts without an input hook
#[derive(Debug, Default)]
pub struct LogReplayer;

impl InputReplayer for LogReplayer {
    fn replay(&self, event: &InputEvent) -> Result<()> {
        tracing::debug!("remote input: {:?}", event);
        Ok(())
    }
}

/// Replayer that records every event, in order
#[derive(Debug, Default)]
pub struct RecordingReplayer {
    events: Mutex<Vec<InputEvent>>,
}

impl RecordingReplayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<InputEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl InputReplayer for RecordingReplayer {
    fn replay(&self, event: &InputEvent) -> Result<()> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Ok(())
    }
}

impl<T: InputReplayer + ?Sized> InputReplayer for std::sync::Arc<T> {
    fn replay(&self, event: &InputEvent) -> Result<()> {
        (**self).replay(event)
    }
}

/// What happened to a remote event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteInput {
    /// Relay disabled; event dropped
    Ignored,
    Replayed,
    /// Control moved; the value is whether this side now controls
    ControlChanged(bool),
    /// Event type this build does not know
    Unknown,
}

/// Shared relay state
pub struct InputRelay {
    enabled: AtomicBool,
    controlling: AtomicBool,
    replaying: AtomicBool,
    replayer: Box<dyn InputReplayer>,
}

impl InputRelay {
    pub fn new(replayer: impl InputReplayer + 'static, enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            controlling: AtomicBool::new(true),
            replaying: AtomicBool::new(false),
            replayer: Box::new(replayer),
        }
    }

    /// Turn relaying on or off. Turning it on takes control.
    pub fn set_enabled(&self, enabled: bool) {
        if enabled {
            self.controlling.store(true, Ordering::SeqCst);
        }
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Whether local input drives the remote side
    pub fn is_controlling(&self) -> bool {
        self.controlling.load(Ordering::SeqCst)
    }

    /// Whether a locally captured event should be sent to the peer.
    ///
    /// Events captured while a remote event is being replayed are our own
    /// injections and are never forwarded.
    pub fn should_forward(&self, event: &InputEvent) -> bool {
        !matches!(event, InputEvent::Unknown)
            && self.is_enabled()
            && self.is_controlling()
            && !self.replaying.load(Ordering::SeqCst)
    }

    /// Flip local control and return the event that tells the peer.
    ///
    /// The peer receives the opposite of our new state.
    pub fn toggle_control(&self) -> InputEvent {
        let now_controlling = !self.controlling.fetch_xor(true, Ordering::SeqCst);
        if now_controlling {
            tracing::info!("this device now has control");
        } else {
            tracing::info!("control handed to the remote device");
        }
        InputEvent::ControlChange {
            controlling: !now_controlling,
        }
    }

    /// Handle an event received from the peer.
    pub fn handle_remote_event(&self, event: &InputEvent) -> Result<RemoteInput> {
        if !self.is_enabled() {
            return Ok(RemoteInput::Ignored);
        }

        match event {
            InputEvent::ControlChange { controlling } => {
                self.controlling.store(*controlling, Ordering::SeqCst);
                tracing::info!(
                    "peer changed control, this device {} control",
                    if *controlling { "now has" } else { "gave up" }
                );
                Ok(RemoteInput::ControlChanged(*controlling))
            }
            InputEvent::Unknown => Ok(RemoteInput::Unknown),
            other => {
                let _guard = ReplayGuard::enter(&self.replaying);
                self.replayer.replay(other)?;
                Ok(RemoteInput::Replayed)
            }
        }
    }
}

/// Marks a replay in progress for as long as it lives
struct ReplayGuard<'a>(&'a AtomicBool);

impl<'a> ReplayGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Detects the control-toggle key combination.
///
/// Feed it every key press and release from the input hook; `press`
/// returns `true` once when the full combination becomes held.
#[derive(Debug, Clone)]
pub struct HotkeyDetector {
    combination: HashSet<Key>,
    pressed: HashSet<Key>,
}

impl HotkeyDetector {
    pub fn new(combination: impl IntoIterator<Item = Key>) -> Self {
        Self {
            combination: combination.into_iter().collect(),
            pressed: HashSet::new(),
        }
    }

    pub fn press(&mut self, key: Key) -> bool {
        let was_complete = self.is_held();
        self.pressed.insert(key);
        !was_complete && self.is_held()
    }

    pub fn release(&mut self, key: &Key) {
        self.pressed.remove(key);
    }

    fn is_held(&self) -> bool {
        !self.combination.is_empty() && self.combination.is_subset(&self.pressed)
    }
}

impl Default for HotkeyDetector {
    /// Ctrl+Alt+Shift+S
    fn default() -> Self {
        Self::new([
            Key::special("ctrl_l"),
            Key::special("alt_l"),
            Key::special("shift"),
            Key::char('s'),
        ])
    }
}
