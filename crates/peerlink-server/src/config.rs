//! Server configuration.

use std::time::Duration;

use peerlink_settings::ServerSettings;

/// Runtime configuration for [`SignalingServer`](crate::server::SignalingServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// Largest inbound WebSocket message, in bytes.
    pub max_message_size: usize,
    /// Per-session outbound queue bound.
    pub outbound_queue_capacity: usize,
    /// Hub command queue bound.
    pub hub_queue_capacity: usize,
    /// Time between keepalive pings.
    pub ping_interval: Duration,
    /// Inbound silence after which a session is closed.
    pub read_deadline: Duration,
    /// Limit on a single frame write.
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_message_size: 64 * 1024,
            outbound_queue_capacity: 256,
            hub_queue_capacity: 1024,
            ping_interval: Duration::from_secs(54),
            read_deadline: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_message_size: s.max_message_size,
            outbound_queue_capacity: s.outbound_queue_capacity,
            hub_queue_capacity: s.hub_queue_capacity,
            ping_interval: s.ping_interval(),
            read_deadline: s.read_deadline(),
            write_timeout: s.write_timeout(),
        }
    }
}

impl ServerConfig {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
