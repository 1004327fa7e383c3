//! End-to-end signaling tests over a real listener and an in-memory registry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use peerlink_core::{AccountId, Device, DeviceType};
use peerlink_server::{ServerConfig, SignalingServer};
use peerlink_store::{AccountRepo, Database, DeviceRepo, SqliteDeviceRegistry};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(2);

struct TestServer {
    server: SignalingServer,
    addr: SocketAddr,
    accounts: AccountRepo,
    devices: DeviceRepo,
    _handle: JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(ServerConfig::default()).await
    }

    async fn start_with(config: ServerConfig) -> Self {
        let db = Database::in_memory().unwrap();
        let registry = Arc::new(SqliteDeviceRegistry::new(db.clone()));
        let server = SignalingServer::new(config, registry);
        let (addr, handle) = server.listen().await.unwrap();
        Self {
            server,
            addr,
            accounts: AccountRepo::new(db.clone()),
            devices: DeviceRepo::new(db),
            _handle: handle,
        }
    }

    fn account(&self, email: &str) -> AccountId {
        self.accounts.create(email).unwrap().id
    }

    fn device(&self, account: AccountId, name: &str) -> Device {
        self.devices.create(account, name, DeviceType::Desktop).unwrap()
    }

    fn url(&self, device_id: &str, token: &str) -> String {
        format!(
            "ws://{}/ws/signaling?device_id={device_id}&device_token={token}",
            self.addr
        )
    }

    async fn connect_raw(&self, device_id: &str, token: &str) -> Ws {
        let (ws, _) = connect_async(self.url(device_id, token)).await.unwrap();
        ws
    }

    /// Connect a device that has no live session and wait until the hub has
    /// registered it.
    async fn connect(&self, device: &Device) -> Ws {
        let before = self.server.session_count().await;
        let ws = self.connect_raw(&device.id.to_string(), &device.token).await;
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if self.server.session_count().await > before {
                return ws;
            }
            assert!(tokio::time::Instant::now() < deadline, "session never registered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Next non-control frame, or `None` if the stream ends.
async fn next_frame(ws: &mut Ws) -> Option<Message> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(msg)) => return Some(msg),
            Some(Err(_)) | None => return None,
        }
    }
}

async fn recv_json(ws: &mut Ws) -> Value {
    let msg = tokio::time::timeout(WAIT, next_frame(ws))
        .await
        .expect("timed out waiting for frame")
        .expect("stream ended");
    match msg {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

async fn expect_close(ws: &mut Ws) -> Option<CloseCode> {
    let msg = tokio::time::timeout(WAIT, next_frame(ws))
        .await
        .expect("timed out waiting for close");
    match msg {
        Some(Message::Close(frame)) => frame.map(|f| f.code),
        None => None,
        Some(other) => panic!("expected close, got {other:?}"),
    }
}

async fn expect_silence(ws: &mut Ws) {
    let got = tokio::time::timeout(Duration::from_millis(200), next_frame(ws)).await;
    assert!(got.is_err(), "unexpected frame: {got:?}");
}

async fn send_json(ws: &mut Ws, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

fn offer(to: &Device) -> Value {
    json!({
        "type": "offer",
        "to_device_id": to.id.to_string(),
        "sdp": {"type": "offer", "sdp": "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n"}
    })
}

#[tokio::test]
async fn offer_between_own_devices_is_relayed_verbatim() {
    let t = TestServer::start().await;
    let user = t.account("alice@example.com");
    let laptop = t.device(user, "laptop");
    let phone = t.device(user, "phone");

    let mut a = t.connect(&laptop).await;
    let mut b = t.connect(&phone).await;

    send_json(&mut a, offer(&phone)).await;
    let got = recv_json(&mut b).await;
    assert_eq!(got["type"], "offer");
    assert_eq!(got["from_device_id"], laptop.id.to_string());
    assert_eq!(got["to_device_id"], phone.id.to_string());
    assert_eq!(got["sdp"], offer(&phone)["sdp"]);

    send_json(
        &mut b,
        json!({
            "type": "answer",
            "to_device_id": laptop.id.to_string(),
            "from_device_id": "spoofed",
            "sdp": {"type": "answer", "sdp": "v=0"}
        }),
    )
    .await;
    let got = recv_json(&mut a).await;
    assert_eq!(got["type"], "answer");
    assert_eq!(got["from_device_id"], phone.id.to_string());
}

#[tokio::test]
async fn ice_candidates_arrive_in_order() {
    let t = TestServer::start().await;
    let user = t.account("alice@example.com");
    let laptop = t.device(user, "laptop");
    let phone = t.device(user, "phone");
    let mut a = t.connect(&laptop).await;
    let mut b = t.connect(&phone).await;

    for i in 0..10 {
        send_json(
            &mut a,
            json!({
                "type": "ice-candidate",
                "to_device_id": phone.id.to_string(),
                "candidate": {"candidate": format!("candidate:{i}"), "sdpMLineIndex": i, "sdpMid": "0"}
            }),
        )
        .await;
    }
    for i in 0..10 {
        let got = recv_json(&mut b).await;
        assert_eq!(got["candidate"]["candidate"], format!("candidate:{i}"));
        assert_eq!(got["candidate"]["sdpMLineIndex"], i);
    }
}

#[tokio::test]
async fn offer_to_another_users_device_is_refused() {
    let t = TestServer::start().await;
    let alice = t.device(t.account("alice@example.com"), "laptop");
    let bob = t.device(t.account("bob@example.com"), "laptop");
    let mut a = t.connect(&alice).await;
    let mut c = t.connect(&bob).await;

    send_json(&mut a, offer(&bob)).await;
    assert_eq!(
        recv_json(&mut a).await,
        json!({"type": "error", "error": "devices must belong to the same user"})
    );
    expect_silence(&mut c).await;
}

#[tokio::test]
async fn validation_errors_go_back_to_sender() {
    let t = TestServer::start().await;
    let user = t.account("alice@example.com");
    let laptop = t.device(user, "laptop");
    let mut a = t.connect(&laptop).await;

    send_json(&mut a, json!({"type": "offer", "sdp": {"type": "offer", "sdp": "x"}})).await;
    assert_eq!(recv_json(&mut a).await["error"], "to_device_id is required for offer");

    send_json(&mut a, json!({"type": "ice-candidate", "to_device_id": "B"})).await;
    assert_eq!(recv_json(&mut a).await["error"], "invalid to_device_id");

    let ghost = peerlink_core::DeviceId::new().to_string();
    send_json(
        &mut a,
        json!({"type": "offer", "to_device_id": ghost, "sdp": {"type": "offer", "sdp": "x"}}),
    )
    .await;
    assert_eq!(recv_json(&mut a).await["error"], "target device not found");
}

#[tokio::test]
async fn offline_target_and_junk_do_not_close_session() {
    let t = TestServer::start().await;
    let user = t.account("alice@example.com");
    let laptop = t.device(user, "laptop");
    let phone = t.device(user, "phone");
    let mut a = t.connect(&laptop).await;

    send_json(
        &mut a,
        json!({
            "type": "ice-candidate",
            "to_device_id": phone.id.to_string(),
            "candidate": {"candidate": "candidate:0"}
        }),
    )
    .await;
    send_json(&mut a, json!({"type": "bye"})).await;
    a.send(Message::text("not json")).await.unwrap();
    a.send(Message::binary(vec![0xff, 0xfe])).await.unwrap();
    expect_silence(&mut a).await;

    // Still routable once the target shows up.
    let mut b = t.connect(&phone).await;
    send_json(&mut a, offer(&phone)).await;
    assert_eq!(recv_json(&mut b).await["type"], "offer");
}

#[tokio::test]
async fn binary_json_frames_are_accepted() {
    let t = TestServer::start().await;
    let user = t.account("alice@example.com");
    let laptop = t.device(user, "laptop");
    let phone = t.device(user, "phone");
    let mut a = t.connect(&laptop).await;
    let mut b = t.connect(&phone).await;

    a.send(Message::binary(offer(&phone).to_string().into_bytes()))
        .await
        .unwrap();
    assert_eq!(recv_json(&mut b).await["from_device_id"], laptop.id.to_string());
}

#[tokio::test]
async fn bad_credentials_get_error_then_policy_close() {
    let t = TestServer::start().await;
    let laptop = t.device(t.account("alice@example.com"), "laptop");
    let phone = t.device(t.account("bob@example.com"), "phone");

    let cases = [
        (String::new(), laptop.token.clone(), "device_id and device_token are required"),
        ("not-a-uuid".to_string(), laptop.token.clone(), "invalid device_id"),
        (laptop.id.to_string(), "wrong".to_string(), "invalid device_token"),
        (laptop.id.to_string(), phone.token.clone(), "device_id does not match device_token"),
    ];
    for (id, token, expected) in cases {
        let mut ws = t.connect_raw(&id, &token).await;
        assert_eq!(
            recv_json(&mut ws).await,
            json!({"type": "error", "error": expected})
        );
        assert_eq!(expect_close(&mut ws).await, Some(CloseCode::Policy));
    }
    assert_eq!(t.server.session_count().await, 0);
}

#[tokio::test]
async fn reconnect_replaces_previous_session() {
    let t = TestServer::start().await;
    let user = t.account("alice@example.com");
    let laptop = t.device(user, "laptop");
    let phone = t.device(user, "phone");

    let mut first = t.connect(&laptop).await;
    let mut second = t.connect_raw(&laptop.id.to_string(), &laptop.token).await;
    // The old session closes once the new one is registered.
    let _ = expect_close(&mut first).await;
    let mut b = t.connect(&phone).await;

    assert_eq!(t.server.session_count().await, 2);

    send_json(&mut b, offer(&laptop)).await;
    assert_eq!(recv_json(&mut second).await["from_device_id"], phone.id.to_string());
}

#[tokio::test]
async fn client_close_deregisters() {
    let t = TestServer::start().await;
    let laptop = t.device(t.account("alice@example.com"), "laptop");
    let mut a = t.connect(&laptop).await;
    a.close(None).await.unwrap();

    let deadline = tokio::time::Instant::now() + WAIT;
    while t.server.session_count().await != 0 {
        assert!(tokio::time::Instant::now() < deadline, "session never deregistered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn silent_client_hits_read_deadline() {
    let t = TestServer::start_with(ServerConfig {
        ping_interval: Duration::from_secs(30),
        read_deadline: Duration::from_millis(200),
        ..ServerConfig::default()
    })
    .await;
    let laptop = t.device(t.account("alice@example.com"), "laptop");
    let mut a = t.connect(&laptop).await;

    let _ = expect_close(&mut a).await;
}

#[tokio::test]
async fn keepalive_pings_hold_an_idle_session_open() {
    let t = TestServer::start_with(ServerConfig {
        ping_interval: Duration::from_millis(100),
        read_deadline: Duration::from_millis(400),
        ..ServerConfig::default()
    })
    .await;
    let laptop = t.device(t.account("alice@example.com"), "laptop");
    let mut a = t.connect(&laptop).await;

    // Reading lets the client answer each ping with a pong.
    let mut pings = 0;
    let window = tokio::time::sleep(Duration::from_millis(1000));
    tokio::pin!(window);
    loop {
        tokio::select! {
            () = &mut window => break,
            msg = a.next() => match msg {
                Some(Ok(Message::Ping(_))) => pings += 1,
                other => panic!("session ended early: {other:?}"),
            },
        }
    }
    assert!(pings >= 3, "only {pings} pings");
    assert_eq!(t.server.session_count().await, 1);
}

#[tokio::test]
async fn shutdown_closes_every_session() {
    let t = TestServer::start().await;
    let user = t.account("alice@example.com");
    let laptop = t.device(user, "laptop");
    let phone = t.device(user, "phone");
    let mut a = t.connect(&laptop).await;
    let mut b = t.connect(&phone).await;

    assert_eq!(t.server.shutdown().await, 2);
    let _ = expect_close(&mut a).await;
    let _ = expect_close(&mut b).await;
}

#[tokio::test]
async fn admission_updates_last_seen() {
    let t = TestServer::start().await;
    let laptop = t.device(t.account("alice@example.com"), "laptop");
    let _a = t.connect(&laptop).await;

    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let stored = t.devices.get(laptop.id).unwrap().unwrap();
        if stored.last_seen_at.is_some() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "last_seen_at never set");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
