//! WebSocket session lifecycle, from admission through teardown.
//!
//! Each admitted connection gets a read loop (on the upgrade task) and a
//! write loop (spawned). The two share a [`SessionHandle`]; whichever side
//! fails first terminates the handle, which stops the other.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::auth::{AdmissionError, Identity};
use crate::config::ServerConfig;
use crate::errors::{Result, ServerError};
use crate::metrics::{ADMISSION_FAILURES_TOTAL, SESSION_DURATION_SECONDS, SESSIONS_OPENED_TOTAL};
use crate::protocol::Envelope;

use super::connection::SessionHandle;
use super::handler::{SessionContext, handle_frame};

type WsSink = SplitSink<WebSocket, Message>;

/// Run an admitted session until either side closes.
///
/// 1. Registers with the hub (evicting any older session for the device)
/// 2. Spawns the write loop
/// 3. Reads frames until close, error, read deadline or termination
/// 4. Deregisters and waits for the write loop
pub async fn run_session(socket: WebSocket, identity: Identity, ctx: SessionContext) {
    let (handle, rx) = SessionHandle::new(identity, ctx.config.outbound_queue_capacity);
    let span = info_span!(
        "session",
        session_id = %handle.id(),
        device_id = %identity.device_id,
        account_id = %identity.account_id,
    );
    drive(socket, handle, rx, ctx).instrument(span).await;
}

async fn drive(
    socket: WebSocket,
    handle: Arc<SessionHandle>,
    rx: mpsc::Receiver<String>,
    ctx: SessionContext,
) {
    info!("session opened");
    counter!(SESSIONS_OPENED_TOTAL).increment(1);
    ctx.hub.register(Arc::clone(&handle)).await;

    let (ws_tx, ws_rx) = socket.split();
    let writer = tokio::spawn(
        write_loop(ws_tx, rx, Arc::clone(&handle), Arc::clone(&ctx.config))
            .instrument(Span::current()),
    );

    read_loop(ws_rx, &handle, &ctx).await;

    handle.terminate();
    ctx.hub.deregister(Arc::clone(&handle)).await;
    let _ = writer.await;

    info!(
        duration_secs = handle.age().as_secs(),
        dropped_frames = handle.dropped_frames(),
        "session closed"
    );
    histogram!(SESSION_DURATION_SECONDS).record(handle.age().as_secs_f64());
}

async fn read_loop(mut ws_rx: SplitStream<WebSocket>, handle: &SessionHandle, ctx: &SessionContext) {
    let deadline = ctx.config.read_deadline;
    loop {
        let next = tokio::select! {
            () = handle.terminated() => {
                debug!("session terminated");
                break;
            }
            next = tokio::time::timeout(deadline, ws_rx.next()) => next,
        };

        let msg = match next {
            Err(_) => {
                info!(idle_secs = handle.idle_for().as_secs(), "read deadline exceeded");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "websocket read failed");
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        handle.touch();
        match msg {
            Message::Text(text) => handle_frame(ctx, handle, text.as_str()).await,
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => handle_frame(ctx, handle, text).await,
                Err(_) => warn!(len = data.len(), "malformed frame ignored"),
            },
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
        }
    }
}

async fn write_loop(
    mut ws_tx: WsSink,
    mut rx: mpsc::Receiver<String>,
    handle: Arc<SessionHandle>,
    config: Arc<ServerConfig>,
) {
    let mut ping = tokio::time::interval(config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately.
    let _ = ping.tick().await;

    let result = loop {
        tokio::select! {
            biased;
            () = handle.queue_closed() => {
                break send(&mut ws_tx, Message::Close(None), config.write_timeout).await;
            }
            frame = rx.recv() => {
                let Some(frame) = frame else { break Ok(()) };
                if let Err(e) = send(&mut ws_tx, Message::Text(frame.into()), config.write_timeout).await {
                    break Err(e);
                }
            }
            _ = ping.tick() => {
                if let Err(e) = send(&mut ws_tx, Message::Ping(Default::default()), config.write_timeout).await {
                    break Err(e);
                }
            }
        }
    };

    if let Err(e) = result {
        debug!(error = %e, "write loop stopped");
    }
    handle.terminate();
}

async fn send(ws_tx: &mut WsSink, msg: Message, limit: Duration) -> Result<()> {
    match tokio::time::timeout(limit, ws_tx.send(msg)).await {
        Ok(sent) => sent.map_err(ServerError::from),
        Err(_) => Err(ServerError::WriteTimeout(limit)),
    }
}

/// Tell a refused client why, then close with a policy-violation code.
pub async fn refuse(mut socket: WebSocket, err: &AdmissionError, write_timeout: Duration) {
    warn!(reason = err.reason(), error = %err, "connection refused");
    counter!(ADMISSION_FAILURES_TOTAL, "reason" => err.reason()).increment(1);

    let frame = match Envelope::error(err.to_string()).to_json() {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "failed to encode admission error");
            return;
        }
    };
    let close = CloseFrame {
        code: close_code::POLICY,
        reason: Utf8Bytes::from_static("authentication failed"),
    };
    for msg in [Message::Text(frame.into()), Message::Close(Some(close))] {
        match tokio::time::timeout(write_timeout, socket.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "failed to deliver admission error");
                return;
            }
            Err(_) => {
                debug!("admission error write timed out");
                return;
            }
        }
    }
}
