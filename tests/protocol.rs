//! End-to-end protocol scenarios, driven over a real TCP socket with a
//! `tokio-tungstenite` client against an axum server bound to an
//! ephemeral port.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use scenehub::{Config, Hub};

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Starts a fresh hub + router on an ephemeral port and returns the
/// address clients should dial.
async fn spawn_server() -> SocketAddr {
    let (hub, _control_task) = Hub::spawn("1".to_string());
    let state = scenehub::AppState {
        hub,
        config: Config::default(),
        asset_dir: std::env::temp_dir(),
    };
    let app = scenehub::server::router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server exited");
    });
    addr
}

async fn connect(addr: SocketAddr) -> WsStream {
    let url = format!("ws://{addr}/ws");
    let (stream, _response) = connect_async(url).await.expect("client connect");
    stream
}

async fn send(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string())).await.expect("send frame");
}

/// Reads the next text frame, decodes it as JSON, and retries on
/// `client_count` (an ambient broadcast every register/unregister
/// triggers that the scenario-level assertions below don't care about).
async fn recv_envelope(ws: &mut WsStream) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        match message {
            Message::Text(text) => {
                let value: Value = serde_json::from_str(&text).expect("valid envelope JSON");
                if value["type"] == "client_count" {
                    continue;
                }
                return value;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected non-text frame: {other:?}"),
        }
    }
}

/// Asserts no application-level frame arrives within a short window.
async fn assert_silent(ws: &mut WsStream) {
    let outcome = tokio::time::timeout(Duration::from_millis(250), recv_envelope(ws)).await;
    assert!(outcome.is_err(), "expected no message, got {outcome:?}");
}

fn avatar_id(entity_created: &Value) -> String {
    entity_created["data"]["entity"]["hd1_id"]
        .as_str()
        .expect("entity_created carries entity.hd1_id")
        .to_string()
}

/// S1 — two connections associate to the same session; each backfills the
/// other's avatar via `entity_created`, own avatar first then each peer.
#[tokio::test]
async fn s1_associate_and_backfill() {
    let addr = spawn_server().await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;

    send(&mut a, json!({"type": "session_associate", "data": {"session_id": "s1"}})).await;
    let a_own_created = recv_envelope(&mut a).await;
    assert_eq!(a_own_created["type"], "entity_created");
    let a_id = avatar_id(&a_own_created);

    send(&mut b, json!({"type": "session_associate", "data": {"session_id": "s1"}})).await;

    let b_first = recv_envelope(&mut b).await;
    assert_eq!(b_first["type"], "entity_created");
    assert_eq!(avatar_id(&b_first), a_id, "B backfills A's avatar first");

    let b_second = recv_envelope(&mut b).await;
    assert_eq!(b_second["type"], "entity_created");
    let b_id = avatar_id(&b_second);
    assert_ne!(b_id, a_id, "B's own avatar has a distinct id from A's");

    let a_second = recv_envelope(&mut a).await;
    assert_eq!(a_second["type"], "entity_created");
    assert_eq!(avatar_id(&a_second), b_id, "A learns about B's avatar after B associates");
}

/// S2 — a position update fans out to the rest of the session, never to
/// the originator.
#[tokio::test]
async fn s2_position_fanout_excludes_self() {
    let addr = spawn_server().await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;

    send(&mut a, json!({"type": "session_associate", "data": {"session_id": "s1"}})).await;
    recv_envelope(&mut a).await; // own entity_created

    send(&mut b, json!({"type": "session_associate", "data": {"session_id": "s1"}})).await;
    recv_envelope(&mut b).await; // backfill of A
    recv_envelope(&mut b).await; // own entity_created
    let a_created = recv_envelope(&mut a).await; // A learns of B
    let a_id = avatar_id(&a_created);

    send(
        &mut a,
        json!({
            "type": "avatar_position_update",
            "data": {"position": {"x": 1.0, "y": 2.0, "z": 3.0}}
        }),
    )
    .await;

    let update = recv_envelope(&mut b).await;
    assert_eq!(update["type"], "avatar_position_update");
    assert_eq!(update["data"]["hd1_id"], a_id);
    assert_eq!(update["data"]["position"]["x"], 1.0);
    assert_eq!(update["data"]["position"]["y"], 2.0);
    assert_eq!(update["data"]["position"]["z"], 3.0);

    assert_silent(&mut a).await;
}

/// S4 — a ping is answered with exactly one pong carrying the same id.
#[tokio::test]
async fn s4_ping_latency() {
    let addr = spawn_server().await;
    let mut a = connect(addr).await;

    send(&mut a, json!({"type": "ping", "data": {"ping_id": "p1", "timestamp": 1}})).await;
    let pong = recv_envelope(&mut a).await;
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["data"]["ping_id"], "p1");
    assert!(pong["data"]["timestamp"].as_i64().unwrap() >= 1);

    assert_silent(&mut a).await;
}

/// S5 — a version mismatch produces exactly one `force_refresh`; no other
/// message results.
#[tokio::test]
async fn s5_version_mismatch_forces_refresh() {
    let addr = spawn_server().await;
    let mut a = connect(addr).await;

    send(&mut a, json!({"type": "version_check", "data": {"js_version": "0"}})).await;
    let refresh = recv_envelope(&mut a).await;
    assert_eq!(refresh["type"], "force_refresh");
    assert_eq!(refresh["data"]["clear_storage"], true);

    assert_silent(&mut a).await;
}

/// Version refresh idempotence — a matching version produces no outbound
/// message at all.
#[tokio::test]
async fn version_check_matching_version_is_silent() {
    let addr = spawn_server().await;
    let mut a = connect(addr).await;

    send(
        &mut a,
        json!({"type": "version_check", "data": {"js_version": scenehub::constants::SERVER_VERSION}}),
    )
    .await;

    assert_silent(&mut a).await;
}

/// A position update before `session_associate` is dropped, not fatal —
/// the connection stays open and can still associate afterwards.
#[tokio::test]
async fn position_update_before_associate_is_dropped_not_fatal() {
    let addr = spawn_server().await;
    let mut a = connect(addr).await;

    send(
        &mut a,
        json!({
            "type": "avatar_position_update",
            "data": {"position": {"x": 9.0, "y": 9.0, "z": 9.0}}
        }),
    )
    .await;
    assert_silent(&mut a).await;

    send(&mut a, json!({"type": "session_associate", "data": {"session_id": "s1"}})).await;
    let created = recv_envelope(&mut a).await;
    assert_eq!(created["type"], "entity_created");
}

/// S6 — a reconnect is assigned a fresh `hd1_id`; the old one never
/// reappears.
#[tokio::test]
async fn s6_reconnect_yields_new_avatar() {
    let addr = spawn_server().await;

    let mut a1 = connect(addr).await;
    send(&mut a1, json!({"type": "session_associate", "data": {"session_id": "s1"}})).await;
    let created = recv_envelope(&mut a1).await;
    let first_id = avatar_id(&created);

    let _ = a1.send(Message::Close(None)).await;
    drop(a1);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut a2 = connect(addr).await;
    send(&mut a2, json!({"type": "session_associate", "data": {"session_id": "s1"}})).await;
    let created2 = recv_envelope(&mut a2).await;
    let second_id = avatar_id(&created2);

    assert_ne!(first_id, second_id, "reconnect assigns a fresh hd1_id");
}

/// An unrecognized `type` is logged and dropped; the connection survives
/// and keeps dispatching.
#[tokio::test]
async fn unknown_message_type_does_not_terminate_the_connection() {
    let addr = spawn_server().await;
    let mut a = connect(addr).await;

    send(&mut a, json!({"type": "not_a_real_type", "data": {}})).await;
    assert_silent(&mut a).await;

    send(&mut a, json!({"type": "ping", "data": {"ping_id": "after-unknown", "timestamp": 1}})).await;
    let pong = recv_envelope(&mut a).await;
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["data"]["ping_id"], "after-unknown");
}
