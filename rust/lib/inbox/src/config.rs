//! Engine configuration.
//!
//! Read from a TOML file such as:
//!
//! ```toml
//! [api]
//! base_url = "https://shop.example.com/api"
//!
//! [connection]
//! url = "https://shop.example.com"
//! max_attempts = 5
//!
//! [polling]
//! interval_secs = 60
//! ```
//!
//! Every field has a default, so a partial (or missing) file is fine.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::Transport;
use crate::error::SyncError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub api: ApiConfig,
    pub connection: ConnectionConfig,
    pub polling: PollingConfig,
}

/// REST endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL; endpoints live under `{base_url}/notifications`.
    pub base_url: String,
    /// Snapshot page size.
    pub page_size: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            page_size: 20,
        }
    }
}

/// Push-channel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Channel endpoint. Empty means "not configured".
    pub url: String,
    /// How long to wait for the connect acknowledgement (milliseconds).
    pub connect_timeout_ms: u64,
    /// Reconnect attempts before giving up.
    pub max_attempts: u32,
    /// First reconnect delay (milliseconds). Doubles per attempt.
    pub base_delay_ms: u64,
    /// Upper bound for the reconnect delay (milliseconds).
    pub max_delay_ms: u64,
    /// Preferred transport first, degraded fallbacks after.
    pub transports: Vec<Transport>,
    /// Send cookies/credentials with the handshake.
    pub with_credentials: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout_ms: 20_000,
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 5_000,
            transports: vec![Transport::WebSocket, Transport::Polling],
            with_credentials: true,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Delay before reconnect attempt `attempt` (1-based):
    /// `base * 2^(attempt-1)`, capped at `max_delay_ms`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_delay_ms.max(self.base_delay_ms)))
    }

    /// Reject settings the manager cannot work with. These are never retried.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.url.trim().is_empty() {
            return Err(SyncError::Config("connection url is not set".into()));
        }
        if self.transports.is_empty() {
            return Err(SyncError::Config("no transports configured".into()));
        }
        if self.max_attempts == 0 {
            return Err(SyncError::Config("max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Unread-count polling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl SyncConfig {
    /// Load config from disk, or return defaults if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, SyncError> {
        toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Check the settings needed for a full session (REST + channel).
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.api.base_url.trim().is_empty() {
            return Err(SyncError::Config("api base_url is not set".into()));
        }
        self.connection.validate()
    }
}
