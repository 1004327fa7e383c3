//! Inbound frame handling.
//!
//! Decodes a frame, validates it against the sending session, and either
//! dispatches it to the hub or queues an `error` envelope back to the sender.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, error, warn};

use peerlink_core::DeviceRegistry;

use crate::config::ServerConfig;
use crate::hub::{HubHandle, Routed};
use crate::metrics::ENVELOPES_REJECTED_TOTAL;
use crate::protocol::{self, Envelope, EnvelopeKind, Inbound, Rejection};

use super::connection::SessionHandle;

/// Everything a session needs besides its own socket.
#[derive(Clone)]
pub struct SessionContext {
    /// Routing hub.
    pub hub: HubHandle,
    /// Device lookups for offer checks.
    pub registry: Arc<dyn DeviceRegistry>,
    /// Timing and capacity settings.
    pub config: Arc<ServerConfig>,
}

/// Handle one inbound text frame from `session`.
pub async fn handle_frame(ctx: &SessionContext, session: &SessionHandle, text: &str) {
    let inbound = match protocol::decode(text) {
        Ok(inbound) => inbound,
        Err(e) => {
            warn!(error = %e, len = text.len(), "malformed frame ignored");
            return;
        }
    };

    let request = match inbound {
        Inbound::Route(request) => request,
        Inbound::Error(message) => {
            debug!(message = message.as_deref().unwrap_or(""), "client reported error");
            return;
        }
        Inbound::Unknown(kind) => {
            warn!(kind, "unknown message type");
            return;
        }
    };

    let kind = request.kind();
    let envelope = match request.validate(session.device_id()) {
        Ok(envelope) => envelope,
        Err(rejection) => return reject(session, kind, &rejection),
    };

    if kind == EnvelopeKind::Offer {
        if let Err(rejection) = check_offer_target(ctx, session, &envelope).await {
            return reject(session, kind, &rejection);
        }
    }

    let Some(target) = envelope.to_device_id else {
        return;
    };
    ctx.hub
        .dispatch(Routed {
            target,
            sender_account: session.account_id(),
            envelope,
        })
        .await;
}

async fn check_offer_target(
    ctx: &SessionContext,
    session: &SessionHandle,
    envelope: &Envelope,
) -> Result<(), Rejection> {
    let Some(target) = envelope.to_device_id else {
        return Err(Rejection::MissingTarget(EnvelopeKind::Offer));
    };
    match ctx.registry.resolve_by_id(target).await {
        Ok(Some(device)) if device.account_id == session.account_id() => Ok(()),
        Ok(Some(_)) => Err(Rejection::AccountMismatch),
        Ok(None) => Err(Rejection::TargetNotFound),
        Err(e) => {
            error!(to_device_id = %target, error = %e, "target lookup failed");
            Err(Rejection::RegistryUnavailable)
        }
    }
}

fn reject(session: &SessionHandle, kind: EnvelopeKind, rejection: &Rejection) {
    debug!(%kind, reason = %rejection, "envelope rejected");
    counter!(ENVELOPES_REJECTED_TOTAL, "kind" => kind.as_str()).increment(1);
    let frame = match Envelope::error(rejection.to_string()).to_json() {
        Ok(frame) => frame,
        Err(e) => {
            error!(error = %e, "failed to encode error envelope");
            return;
        }
    };
    if let Err(e) = session.try_enqueue(frame) {
        warn!(?e, reason = %rejection, "could not queue error for sender");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::hub::Hub;
    use async_trait::async_trait;
    use chrono::Utc;
    use peerlink_core::{AccountId, Device, DeviceId, DeviceType, InMemoryRegistry, RegistryError};
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    struct Harness {
        ctx: SessionContext,
        registry: Arc<InMemoryRegistry>,
    }

    impl Harness {
        fn new() -> Self {
            let registry = Arc::new(InMemoryRegistry::new());
            Self::with_registry(registry.clone(), registry)
        }

        fn with_registry(registry: Arc<InMemoryRegistry>, backend: Arc<dyn DeviceRegistry>) -> Self {
            let (hub, _task) = Hub::spawn(64);
            Self {
                ctx: SessionContext {
                    hub,
                    registry: backend,
                    config: Arc::new(ServerConfig::default()),
                },
                registry,
            }
        }

        async fn connect(&self, account: AccountId) -> (Arc<SessionHandle>, mpsc::Receiver<String>) {
            let now = Utc::now();
            let device = Device {
                id: DeviceId::new(),
                account_id: account,
                name: "dev".into(),
                device_type: DeviceType::Desktop,
                token: format!("tok-{}", DeviceId::new()),
                last_seen_at: None,
                created_at: now,
                updated_at: now,
            };
            let identity = Identity {
                device_id: device.id,
                account_id: account,
            };
            self.registry.insert(device);
            let (handle, rx) = SessionHandle::new(identity, 8);
            self.ctx.hub.register(handle.clone()).await;
            (handle, rx)
        }

        async fn send(&self, session: &SessionHandle, frame: Value) {
            handle_frame(&self.ctx, session, &frame.to_string()).await;
            // Round trip through the hub so earlier dispatches are processed.
            let _ = self.ctx.hub.session_count().await;
        }
    }

    fn recv(rx: &mut mpsc::Receiver<String>) -> Value {
        serde_json::from_str(&rx.try_recv().expect("frame queued")).unwrap()
    }

    fn offer(to: impl ToString) -> Value {
        json!({
            "type": "offer",
            "to_device_id": to.to_string(),
            "sdp": {"type": "offer", "sdp": "v=0\r\n"}
        })
    }

    #[tokio::test]
    async fn offer_to_same_account_is_forwarded() {
        let h = Harness::new();
        let account = AccountId::new();
        let (a, mut rx_a) = h.connect(account).await;
        let (b, mut rx_b) = h.connect(account).await;

        h.send(&a, offer(b.device_id())).await;

        let got = recv(&mut rx_b);
        assert_eq!(got["type"], "offer");
        assert_eq!(got["from_device_id"], a.device_id().to_string());
        assert_eq!(got["to_device_id"], b.device_id().to_string());
        assert_eq!(got["sdp"], json!({"type": "offer", "sdp": "v=0\r\n"}));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn offer_across_accounts_is_refused() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect(AccountId::new()).await;
        let (c, mut rx_c) = h.connect(AccountId::new()).await;

        h.send(&a, offer(c.device_id())).await;

        assert_eq!(
            recv(&mut rx_a),
            json!({"type": "error", "error": "devices must belong to the same user"})
        );
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn offer_to_unknown_device_is_refused() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect(AccountId::new()).await;
        h.send(&a, offer(DeviceId::new())).await;
        assert_eq!(recv(&mut rx_a)["error"], "target device not found");
    }

    #[tokio::test]
    async fn registry_failure_on_offer_is_reported() {
        struct Down;

        #[async_trait]
        impl DeviceRegistry for Down {
            async fn resolve_by_token(&self, _: &str) -> Result<Option<Device>, RegistryError> {
                Err(RegistryError::Backend("down".into()))
            }
            async fn resolve_by_id(&self, _: DeviceId) -> Result<Option<Device>, RegistryError> {
                Err(RegistryError::Backend("down".into()))
            }
            async fn touch_last_seen(&self, _: DeviceId) -> Result<(), RegistryError> {
                Ok(())
            }
        }

        let h = Harness::with_registry(Arc::new(InMemoryRegistry::new()), Arc::new(Down));
        let (a, mut rx_a) = h.connect(AccountId::new()).await;
        h.send(&a, offer(DeviceId::new())).await;
        assert_eq!(recv(&mut rx_a)["error"], "failed to verify target device");
    }

    #[tokio::test]
    async fn missing_target_names_the_kind() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect(AccountId::new()).await;
        h.send(&a, json!({"type": "answer", "sdp": {"type": "answer", "sdp": "x"}}))
            .await;
        assert_eq!(recv(&mut rx_a)["error"], "to_device_id is required for answer");
    }

    #[tokio::test]
    async fn candidate_is_forwarded_without_registry_check() {
        let h = Harness::new();
        let account = AccountId::new();
        let (a, _rx_a) = h.connect(account).await;
        let (b, mut rx_b) = h.connect(account).await;

        h.send(
            &a,
            json!({
                "type": "ice-candidate",
                "to_device_id": b.device_id().to_string(),
                "from_device_id": DeviceId::new().to_string(),
                "candidate": {"candidate": "candidate:1", "sdpMLineIndex": 0, "sdpMid": "0"}
            }),
        )
        .await;

        let got = recv(&mut rx_b);
        assert_eq!(got["type"], "ice-candidate");
        assert_eq!(got["from_device_id"], a.device_id().to_string());
        assert_eq!(got["candidate"]["sdpMid"], "0");
    }

    #[tokio::test]
    async fn sdp_without_inner_type_is_forwarded() {
        let h = Harness::new();
        let account = AccountId::new();
        let (a, _rx_a) = h.connect(account).await;
        let (b, mut rx_b) = h.connect(account).await;

        h.send(
            &a,
            json!({"type": "offer", "to_device_id": b.device_id().to_string(), "sdp": {"sdp": "v=0"}}),
        )
        .await;

        assert_eq!(recv(&mut rx_b)["sdp"], json!({"sdp": "v=0"}));
    }

    #[tokio::test]
    async fn candidate_fields_are_relayed_as_sent() {
        let h = Harness::new();
        let account = AccountId::new();
        let (a, _rx_a) = h.connect(account).await;
        let (b, mut rx_b) = h.connect(account).await;
        let candidate = json!({"candidate": "", "sdpMLineIndex": -1, "sdpMid": null});

        h.send(
            &a,
            json!({
                "type": "ice-candidate",
                "to_device_id": b.device_id().to_string(),
                "candidate": candidate
            }),
        )
        .await;

        assert_eq!(recv(&mut rx_b)["candidate"], candidate);
    }

    #[tokio::test]
    async fn numeric_target_is_reported_invalid() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect(AccountId::new()).await;
        h.send(
            &a,
            json!({"type": "ice-candidate", "to_device_id": 42, "candidate": {"candidate": "x"}}),
        )
        .await;
        assert_eq!(
            recv(&mut rx_a),
            json!({"type": "error", "error": "invalid to_device_id"})
        );
    }

    #[tokio::test]
    async fn answer_across_accounts_is_dropped_silently() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect(AccountId::new()).await;
        let (c, mut rx_c) = h.connect(AccountId::new()).await;

        h.send(
            &a,
            json!({
                "type": "answer",
                "to_device_id": c.device_id().to_string(),
                "sdp": {"type": "answer", "sdp": "x"}
            }),
        )
        .await;

        assert!(rx_a.try_recv().is_err());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn junk_and_unknown_frames_are_ignored() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect(AccountId::new()).await;

        handle_frame(&h.ctx, &a, "not json").await;
        h.send(&a, json!({"type": "bye"})).await;
        h.send(&a, json!({"type": "error", "error": "camera busy"})).await;

        assert!(rx_a.try_recv().is_err());
        assert!(!a.is_closed());
    }

    #[tokio::test]
    async fn full_sender_queue_drops_error() {
        let h = Harness::new();
        let identity = Identity {
            device_id: DeviceId::new(),
            account_id: AccountId::new(),
        };
        let (a, mut rx_a) = SessionHandle::new(identity, 1);
        a.try_enqueue("filler".into()).unwrap();

        h.send(&a, json!({"type": "offer"})).await;

        assert_eq!(rx_a.try_recv().unwrap(), "filler");
        assert!(rx_a.try_recv().is_err());
        assert!(!a.is_closed());
    }
}
