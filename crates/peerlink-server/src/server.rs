//! `SignalingServer`: axum HTTP surface around the hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::rejection::QueryRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use peerlink_core::DeviceRegistry;

use crate::auth::{Authenticator, ConnectParams};
use crate::config::ServerConfig;
use crate::errors::{Result, ServerError};
use crate::health::{self, HealthResponse};
use crate::hub::{Hub, HubHandle};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::handler::SessionContext;
use crate::websocket::session::{refuse, run_session};

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// What every session needs.
    pub ctx: SessionContext,
    /// Credential checks.
    pub authenticator: Authenticator,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The signaling server.
pub struct SignalingServer {
    config: Arc<ServerConfig>,
    registry: Arc<dyn DeviceRegistry>,
    hub: HubHandle,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl SignalingServer {
    /// Create a server and start its hub. Must be called inside a Tokio runtime.
    pub fn new(config: ServerConfig, registry: Arc<dyn DeviceRegistry>) -> Self {
        let (hub, _task) = Hub::spawn(config.hub_queue_capacity);
        Self {
            config: Arc::new(config),
            registry,
            hub,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router.
    pub fn router(&self) -> Router {
        let state = AppState {
            ctx: SessionContext {
                hub: self.hub.clone(),
                registry: Arc::clone(&self.registry),
                config: Arc::clone(&self.config),
            },
            authenticator: Authenticator::new(Arc::clone(&self.registry)),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws/signaling", get(signaling_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Bind and serve in the background until [`shutdown`](Self::shutdown).
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let app = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "http server failed");
            }
        });

        info!(%local, "signaling server listening");
        Ok((local, handle))
    }

    /// Close every session transport, then stop the listener.
    /// Returns how many sessions were closed.
    pub async fn shutdown(&self) -> usize {
        let closed = self.hub.shutdown().await;
        self.shutdown.shutdown();
        info!(closed, "signaling server shutting down");
        closed
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        self.hub.session_count().await
    }

    /// The shutdown coordinator.
    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }
}

/// GET /ws/signaling
async fn signaling_handler(
    ws: WebSocketUpgrade,
    params: std::result::Result<Query<ConnectParams>, QueryRejection>,
    State(state): State<AppState>,
) -> Response {
    let params = params.map(|Query(p)| p).unwrap_or_default();
    let write_timeout = state.ctx.config.write_timeout;
    ws.max_message_size(state.ctx.config.max_message_size)
        .on_upgrade(move |socket| async move {
            match state.authenticator.authenticate(&params).await {
                Ok(identity) => run_session(socket, identity, state.ctx).await,
                Err(e) => refuse(socket, &e, write_timeout).await,
            }
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let sessions = state.ctx.hub.session_count().await;
    Json(health::health_check(state.start_time, sessions))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
