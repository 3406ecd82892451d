//! Service configuration, persisted as JSON

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clipboard::PollSettings;
use crate::protocol::constants::{
    CLIPBOARD_ERROR_BACKOFF_MS, CLIPBOARD_POLL_INTERVAL_MS, DEFAULT_BIND_HOST, DEFAULT_PORT,
    MAX_FRAME_SIZE,
};
use crate::{Error, Result};

/// Which end of the star this process is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Server,
    Client,
}

/// What a client does when its connection drops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// The session ends; restarting is up to the user
    #[default]
    Never,
    /// Try again after a fixed delay until stopped
    Every { delay_ms: u64 },
}

impl ReconnectPolicy {
    pub fn delay(&self) -> Option<Duration> {
        match self {
            ReconnectPolicy::Never => None,
            ReconnectPolicy::Every { delay_ms } => Some(Duration::from_millis(*delay_ms)),
        }
    }
}

/// Configuration for the clipbridge service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: Mode,
    /// Interface to bind (server) or host to connect to (client)
    pub host: String,
    pub port: u16,
    pub poll_interval_ms: u64,
    pub poll_backoff_ms: u64,
    /// Largest frame payload accepted or sent, in bytes
    pub max_frame_size: usize,
    pub reconnect: ReconnectPolicy,
    /// Relay mouse and keyboard events as well as the clipboard
    pub kvm_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Server,
            host: DEFAULT_BIND_HOST.to_string(),
            port: DEFAULT_PORT,
            poll_interval_ms: CLIPBOARD_POLL_INTERVAL_MS,
            poll_backoff_ms: CLIPBOARD_ERROR_BACKOFF_MS,
            max_frame_size: MAX_FRAME_SIZE,
            reconnect: ReconnectPolicy::Never,
            kvm_enabled: false,
        }
    }
}

impl Config {
    /// Server configuration listening on `port`
    pub fn server(port: u16) -> Self {
        Self {
            mode: Mode::Server,
            port,
            ..Self::default()
        }
    }

    /// Client configuration connecting to `host:port`
    pub fn client(host: impl Into<String>, port: u16) -> Self {
        Self {
            mode: Mode::Client,
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// `~/.config/clipbridge/config.json` or the platform equivalent
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("clipbridge")
            .join("config.json")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Load `path`, falling back to defaults if it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("no config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("cannot create {}: {}", parent.display(), e)))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| Error::Config(format!("cannot write {}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 && self.mode == Mode::Client {
            return Err(Error::Config("port must be between 1 and 65535".to_string()));
        }
        if self.max_frame_size == 0 {
            return Err(Error::Config("max_frame_size must be at least 1".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be at least 1".to_string()));
        }
        if self.mode == Mode::Client {
            let host = self.host.trim();
            if host.is_empty() || host == DEFAULT_BIND_HOST {
                return Err(Error::Config("client mode needs a server host".to_string()));
            }
        }
        if let ReconnectPolicy::Every { delay_ms: 0 } = self.reconnect {
            return Err(Error::Config("reconnect delay must be at least 1 ms".to_string()));
        }
        Ok(())
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(self.poll_interval_ms),
            error_backoff: Duration::from_millis(self.poll_backoff_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 5555);
        assert_eq!(config.mode, Mode::Server);
        assert_eq!(config.reconnect, ReconnectPolicy::Never);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"mode": "client", "host": "192.168.1.100"}"#).unwrap();
        assert_eq!(config.mode, Mode::Client);
        assert_eq!(config.host, "192.168.1.100");
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reconnect_policy_json() {
        let config: Config =
            serde_json::from_str(r#"{"reconnect": {"every": {"delay_ms": 2000}}}"#).unwrap();
        assert_eq!(config.reconnect.delay(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_client_needs_host() {
        assert!(Config::client("", 5555).validate().is_err());
        assert!(Config::client("0.0.0.0", 5555).validate().is_err());
        assert!(Config::client("10.0.0.2", 0).validate().is_err());
        assert!(Config::client("10.0.0.2", 5555).validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("clipbridge-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");

        let mut config = Config::client("10.0.0.2", 6000);
        config.kvm_enabled = true;
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join(format!("clipbridge-missing-{}.json", uuid::Uuid::new_v4()));
        assert_eq!(Config::load_or_default(&path).unwrap(), Config::default());
        assert!(Config::load(&path).is_err());
    }
}
