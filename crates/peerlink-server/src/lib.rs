//! # peerlink-server
//!
//! WebRTC signaling relay over WebSocket.
//!
//! - Admission: `device_id` + `device_token` checked against a [`DeviceRegistry`](peerlink_core::DeviceRegistry)
//! - Sessions: one read loop and one write loop per connection, keepalive pings, read deadline
//! - Hub: a single task owning the device-to-session map; routes offers, answers and ICE candidates
//! - HTTP: `/ws/signaling`, `/health`, `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod errors;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::{Result, ServerError};
pub use server::SignalingServer;
