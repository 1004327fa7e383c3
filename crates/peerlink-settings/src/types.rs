//! Settings structures.
//!
//! Field names are camelCase on disk. Every struct carries
//! `#[serde(default)]` so a partial file only overrides what it names.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeerlinkSettings {
    /// Signaling listener and session tuning.
    pub server: ServerSettings,
    /// Device registry database.
    pub database: DatabaseSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl PeerlinkSettings {
    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let s = &self.server;
        if s.outbound_queue_capacity == 0 {
            return Err(SettingsError::out_of_range(
                "server.outboundQueueCapacity",
                "must be greater than 0",
            ));
        }
        if s.hub_queue_capacity == 0 {
            return Err(SettingsError::out_of_range(
                "server.hubQueueCapacity",
                "must be greater than 0",
            ));
        }
        if s.ping_interval_secs == 0 || s.ping_interval_secs >= s.read_deadline_secs {
            return Err(SettingsError::out_of_range(
                "server.pingIntervalSecs",
                format!(
                    "({}) must be non-zero and shorter than server.readDeadlineSecs ({})",
                    s.ping_interval_secs, s.read_deadline_secs
                ),
            ));
        }
        if s.write_timeout_secs == 0 {
            return Err(SettingsError::out_of_range(
                "server.writeTimeoutSecs",
                "must be greater than 0",
            ));
        }
        if s.max_message_size < 1024 {
            return Err(SettingsError::out_of_range(
                "server.maxMessageSize",
                "must be at least 1024 bytes",
            ));
        }
        Ok(())
    }
}

/// Signaling server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_size: usize,
    /// Per-session outbound queue bound.
    pub outbound_queue_capacity: usize,
    /// Hub command queue bound.
    pub hub_queue_capacity: usize,
    /// Seconds between keepalive pings.
    pub ping_interval_secs: u64,
    /// Seconds of inbound silence before a session is considered dead.
    pub read_deadline_secs: u64,
    /// Seconds a single frame write may take.
    pub write_timeout_secs: u64,
}

impl ServerSettings {
    /// Keepalive interval as a `Duration`.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Read deadline as a `Duration`.
    pub fn read_deadline(&self) -> Duration {
        Duration::from_secs(self.read_deadline_secs)
    }

    /// Write timeout as a `Duration`.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            max_message_size: 64 * 1024,
            outbound_queue_capacity: 256,
            hub_queue_capacity: 1024,
            ping_interval_secs: 54,
            read_deadline_secs: 60,
            write_timeout_secs: 10,
        }
    }
}

/// Database settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Database file. `None` means `~/.peerlink/peerlink.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl DatabaseSettings {
    /// The configured path, or the default under the user's home.
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| crate::loader::peerlink_home().join("peerlink.db"))
    }
}

/// Deployment environment. Selects the log format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Human-readable console logs.
    #[default]
    Development,
    /// JSON logs.
    Production,
}

impl Environment {
    /// Parse the values accepted in `ENV`/`PEERLINK_ENV`.
    pub fn parse(val: &str) -> Option<Self> {
        match val.to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Development or production output.
    pub environment: Environment,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            environment: Environment::Development,
        }
    }
}
