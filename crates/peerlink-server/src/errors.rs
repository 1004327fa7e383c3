//! Server error types.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the signaling server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// A frame write did not finish in time.
    #[error("websocket write timed out after {0:?}")]
    WriteTimeout(Duration),
    /// The WebSocket transport failed.
    #[error("websocket transport error: {0}")]
    Transport(#[from] axum::Error),
    /// The Prometheus recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
