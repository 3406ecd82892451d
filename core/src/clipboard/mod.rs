//! Clipboard access, shared last-seen state and the change poller
//!
//! Both the poller (local changes) and the receive path (remote updates)
//! go through [`ClipboardState`]. Each side compares against the last-seen
//! value before acting and records what it saw or wrote, which is what
//! stops a value from bouncing between peers forever.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use arboard::Clipboard as ArboardClipboard;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Source and sink for clipboard text.
///
/// Polling the system clipboard is the default; anything able to report the
/// current value and accept a new one can stand in for it.
pub trait ClipboardBackend: Send {
    /// Current clipboard text. An empty clipboard reads as `""`.
    fn read(&mut self) -> Result<String>;

    fn write(&mut self, text: &str) -> Result<()>;
}

/// The OS clipboard, via arboard
#[derive(Debug, Default)]
pub struct SystemClipboard;

impl SystemClipboard {
    pub fn new() -> Self {
        Self
    }
}

impl ClipboardBackend for SystemClipboard {
    fn read(&mut self) -> Result<String> {
        let mut clipboard = ArboardClipboard::new()
            .map_err(|e| Error::Clipboard(e.to_string()))?;

        match clipboard.get_text() {
            Ok(text) => Ok(text),
            Err(arboard::Error::ContentNotAvailable) => Ok(String::new()),
            Err(e) => Err(Error::Clipboard(e.to_string())),
        }
    }

    fn write(&mut self, text: &str) -> Result<()> {
        let mut clipboard = ArboardClipboard::new()
            .map_err(|e| Error::Clipboard(e.to_string()))?;

        clipboard.set_text(text)
            .map_err(|e| Error::Clipboard(e.to_string()))
    }
}

/// In-process clipboard, for headless hosts and tests.
///
/// Clones share the same value, so one clone can be handed to the session
/// while another plays the user.
#[derive(Debug, Clone, Default)]
pub struct MemoryClipboard {
    value: Arc<Mutex<String>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the value, as a local copy would
    pub fn set(&self, text: &str) {
        *lock(&self.value) = text.to_string();
    }

    pub fn get(&self) -> String {
        lock(&self.value).clone()
    }
}

impl ClipboardBackend for MemoryClipboard {
    fn read(&mut self) -> Result<String> {
        Ok(self.get())
    }

    fn write(&mut self, text: &str) -> Result<()> {
        self.set(text);
        Ok(())
    }
}

struct Inner {
    backend: Box<dyn ClipboardBackend>,
    last_seen: String,
}

/// Process-wide clipboard state: the backend plus the last value seen or
/// written by either direction.
pub struct ClipboardState {
    inner: Mutex<Inner>,
}

impl ClipboardState {
    pub fn new(backend: impl ClipboardBackend + 'static) -> Self {
        Self::from_boxed(Box::new(backend))
    }

    pub fn from_boxed(backend: Box<dyn ClipboardBackend>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                backend,
                last_seen: String::new(),
            }),
        }
    }

    /// Read the clipboard once.
    ///
    /// Returns the new value if it is non-empty and differs from the last
    /// one seen; last-seen is updated in that case only.
    pub fn poll_change(&self) -> Result<Option<String>> {
        let mut inner = lock(&self.inner);
        let current = inner.backend.read()?;

        if current.is_empty() || current == inner.last_seen {
            return Ok(None);
        }

        inner.last_seen = current.clone();
        Ok(Some(current))
    }

    /// Apply a value received from a peer.
    ///
    /// Writes only if it differs from last-seen. Returns whether the
    /// clipboard was written.
    pub fn apply_remote(&self, text: &str) -> Result<bool> {
        let mut inner = lock(&self.inner);
        if text == inner.last_seen {
            return Ok(false);
        }

        inner.backend.write(text)?;
        inner.last_seen = text.to_string();
        Ok(true)
    }

    pub fn last_seen(&self) -> String {
        lock(&self.inner).last_seen.clone()
    }
}

/// Poller timing
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    /// Pause after a failed read
    pub error_backoff: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        use crate::protocol::constants::{CLIPBOARD_ERROR_BACKOFF_MS, CLIPBOARD_POLL_INTERVAL_MS};
        Self {
            interval: Duration::from_millis(CLIPBOARD_POLL_INTERVAL_MS),
            error_backoff: Duration::from_millis(CLIPBOARD_ERROR_BACKOFF_MS),
        }
    }
}

/// Poll the clipboard until `shutdown` fires, calling `on_change` for each
/// new local value.
///
/// Read failures are logged and retried after the back-off; they never end
/// the loop.
pub async fn run_poller<F, Fut>(
    state: Arc<ClipboardState>,
    settings: PollSettings,
    shutdown: CancellationToken,
    mut on_change: F,
) where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = ()>,
{
    tracing::debug!("clipboard poller started ({:?} interval)", settings.interval);

    loop {
        let delay = match state.poll_change() {
            Ok(Some(text)) => {
                tracing::info!("local clipboard changed ({} chars)", text.chars().count());
                on_change(text).await;
                settings.interval
            }
            Ok(None) => settings.interval,
            Err(e) => {
                tracing::warn!("clipboard read error: {}", e);
                settings.error_backoff
            }
        };

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    tracing::debug!("clipboard poller stopped");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
