//! The routing hub.
//!
//! One task owns the `DeviceId -> SessionHandle` map and processes register,
//! deregister and dispatch commands strictly in arrival order. Nothing else
//! touches the map, so no lock is needed and every command sees a consistent
//! registry. The hub never waits on a session: delivery is a single
//! `try_send`, and a full queue gets its session evicted.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, gauge};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use peerlink_core::{AccountId, DeviceId};

use crate::metrics::{
    ENVELOPES_DROPPED_TOTAL, ENVELOPES_ROUTED_TOTAL, SESSIONS_ACTIVE, SESSIONS_EVICTED_TOTAL,
};
use crate::protocol::Envelope;
use crate::websocket::connection::{EnqueueError, SessionHandle};

/// A validated envelope on its way to `target`.
#[derive(Debug, Clone)]
pub struct Routed {
    /// Recipient device.
    pub target: DeviceId,
    /// Account of the sending session.
    pub sender_account: AccountId,
    /// Envelope to deliver, sender already stamped.
    pub envelope: Envelope,
}

enum Command {
    Register(Arc<SessionHandle>),
    Deregister(Arc<SessionHandle>),
    Dispatch(Routed),
    Count(oneshot::Sender<usize>),
    Shutdown(oneshot::Sender<usize>),
}

/// Cloneable sender side of the hub.
#[derive(Clone, Debug)]
pub struct HubHandle {
    tx: mpsc::Sender<Command>,
}

impl HubHandle {
    /// Make `session` the active session for its device, evicting any
    /// previous one. If the hub is gone the session is terminated.
    pub async fn register(&self, session: Arc<SessionHandle>) {
        if let Err(mpsc::error::SendError(cmd)) = self.tx.send(Command::Register(session)).await {
            if let Command::Register(session) = cmd {
                session.terminate();
            }
            warn!("hub stopped; refusing session");
        }
    }

    /// Remove `session` if it is still the active one, and close its queue.
    pub async fn deregister(&self, session: Arc<SessionHandle>) {
        if let Err(mpsc::error::SendError(cmd)) = self.tx.send(Command::Deregister(session)).await {
            if let Command::Deregister(session) = cmd {
                session.close_queue();
            }
        }
    }

    /// Hand an envelope to the hub for delivery.
    pub async fn dispatch(&self, routed: Routed) {
        if self.tx.send(Command::Dispatch(routed)).await.is_err() {
            debug!("hub stopped; envelope dropped");
        }
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Count(tx)).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Close every registered session's transport and refuse later
    /// registrations. Returns how many sessions were told to close.
    pub async fn shutdown(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(tx)).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Owner of the session registry.
pub struct Hub {
    sessions: HashMap<DeviceId, Arc<SessionHandle>>,
    rx: mpsc::Receiver<Command>,
    shutting_down: bool,
}

impl Hub {
    /// Start the hub task. It runs until every [`HubHandle`] is dropped.
    pub fn spawn(capacity: usize) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let hub = Self {
            sessions: HashMap::new(),
            rx,
            shutting_down: false,
        };
        let task = tokio::spawn(hub.run());
        (HubHandle { tx }, task)
    }

    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            self.handle(cmd);
        }
        debug!(remaining = self.sessions.len(), "hub stopped");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Register(session) => self.register(session),
            Command::Deregister(session) => self.deregister(&session),
            Command::Dispatch(routed) => self.dispatch(routed),
            Command::Count(reply) => {
                let _ = reply.send(self.sessions.len());
            }
            Command::Shutdown(reply) => {
                self.shutting_down = true;
                for session in self.sessions.values() {
                    session.terminate();
                }
                info!(sessions = self.sessions.len(), "closing all sessions");
                let _ = reply.send(self.sessions.len());
            }
        }
    }

    fn register(&mut self, session: Arc<SessionHandle>) {
        if self.shutting_down {
            debug!(session_id = %session.id(), "shutting down; refusing session");
            session.terminate();
            return;
        }

        let device = session.device_id();
        if let Some(previous) = self.sessions.insert(device, Arc::clone(&session)) {
            if previous.id() != session.id() {
                info!(
                    device_id = %device,
                    evicted = %previous.id(),
                    replacement = %session.id(),
                    "device reconnected; evicting previous session"
                );
                previous.terminate();
                counter!(SESSIONS_EVICTED_TOTAL, "reason" => "replaced").increment(1);
            }
        }
        debug!(device_id = %device, session_id = %session.id(), "session registered");
        self.record_active();
    }

    fn deregister(&mut self, session: &Arc<SessionHandle>) {
        session.close_queue();
        let device = session.device_id();
        let is_current = self
            .sessions
            .get(&device)
            .is_some_and(|current| current.id() == session.id());
        if is_current {
            let _ = self.sessions.remove(&device);
            debug!(device_id = %device, session_id = %session.id(), "session deregistered");
            self.record_active();
        }
    }

    fn dispatch(&mut self, routed: Routed) {
        let kind = routed.envelope.kind.as_str();
        let Some(target) = self.sessions.get(&routed.target).map(Arc::clone) else {
            warn!(to_device_id = %routed.target, kind, "target device not connected");
            counter!(ENVELOPES_DROPPED_TOTAL, "reason" => "not_connected").increment(1);
            return;
        };

        if target.account_id() != routed.sender_account {
            warn!(
                to_device_id = %routed.target,
                kind,
                "target belongs to another account; envelope dropped"
            );
            counter!(ENVELOPES_DROPPED_TOTAL, "reason" => "account_mismatch").increment(1);
            return;
        }

        let frame = match routed.envelope.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, kind, "failed to encode envelope");
                return;
            }
        };

        match target.try_enqueue(frame) {
            Ok(()) => {
                counter!(ENVELOPES_ROUTED_TOTAL, "kind" => kind).increment(1);
            }
            Err(EnqueueError::Full) => {
                warn!(
                    to_device_id = %routed.target,
                    session_id = %target.id(),
                    kind,
                    "target queue full; evicting session"
                );
                target.terminate();
                let _ = self.sessions.remove(&routed.target);
                self.record_active();
                counter!(SESSIONS_EVICTED_TOTAL, "reason" => "queue_full").increment(1);
                counter!(ENVELOPES_DROPPED_TOTAL, "reason" => "queue_full").increment(1);
            }
            Err(EnqueueError::Closed) => {
                debug!(session_id = %target.id(), kind, "target closing; envelope dropped");
                let _ = self.sessions.remove(&routed.target);
                self.record_active();
                counter!(ENVELOPES_DROPPED_TOTAL, "reason" => "closing").increment(1);
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_active(&self) {
        gauge!(SESSIONS_ACTIVE).set(self.sessions.len() as f64);
    }
}
