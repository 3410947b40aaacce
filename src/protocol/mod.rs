//! Protocol handlers: the static dispatch table keyed by envelope `type`.
//!
//! One function matching on the tag decides what happens next for each
//! inbound message type this hub speaks.

use std::cell::RefCell;

use log::{debug, warn};
use serde::Deserialize;
use serde_json::json;

use crate::avatar::{Position, Rotation};
use crate::codec::{BufferPool, Envelope, SizeClass};
use crate::error::HubError;
use crate::hub::Hub;

/// Picks the [`SizeClass`] a raw frame should be checked against, based on
/// its `type` tag. Anything other than a position update is a control
/// message.
#[must_use]
pub fn size_class_for(kind: &str) -> SizeClass {
    match kind {
        "avatar_position_update" => SizeClass::Position,
        _ => SizeClass::Control,
    }
}

#[derive(Debug, Deserialize)]
struct PingPayload {
    ping_id: String,
}

#[derive(Debug, Deserialize)]
struct SessionAssociatePayload {
    session_id: String,
}

#[derive(Debug, Deserialize, Default)]
struct PositionUpdatePayload {
    position: Position,
    #[serde(default)]
    rotation: Option<Rotation>,
    #[serde(default)]
    camera_position: Option<Position>,
}

#[derive(Debug, Deserialize)]
struct VersionCheckPayload {
    js_version: String,
}

/// Dispatches inbound envelopes for a single connection.
///
/// Holds just enough identity (`hd1_id`, this connection's own outbound
/// sender) to reply directly without round-tripping the hub, plus a
/// handle to the hub for anything that needs the session index or the
/// avatar registry.
#[derive(Debug)]
pub struct Dispatcher {
    pub hub: Hub,
    pub hd1_id: String,
    pub self_tx: tokio::sync::mpsc::Sender<bytes::Bytes>,
    /// Scratch buffers for self-replies (`pong`, `force_refresh`). A
    /// `RefCell` is enough: one read loop task owns and drives this
    /// dispatcher sequentially, there is never concurrent access.
    pool: RefCell<BufferPool>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(hub: Hub, hd1_id: String, self_tx: tokio::sync::mpsc::Sender<bytes::Bytes>) -> Self {
        Self {
            hub,
            hd1_id,
            self_tx,
            pool: RefCell::new(BufferPool::new()),
        }
    }

    /// Dispatch one decoded envelope. Returns an error for dispositions
    /// that terminate the connection; everything recoverable is logged
    /// and swallowed here.
    pub async fn dispatch(&self, envelope: Envelope) -> Result<(), HubError> {
        match envelope.kind.as_str() {
            "ping" => self.handle_ping(envelope).await,
            "session_associate" => self.handle_session_associate(envelope).await,
            "avatar_position_update" => self.handle_position_update(envelope).await,
            "version_check" => self.handle_version_check(envelope).await,
            "client_info" => {
                debug!("{}: client_info {:?}", self.hd1_id, envelope.data);
                Ok(())
            }
            other => {
                warn!("{}: unknown message type {other}", self.hd1_id);
                Err(HubError::UnknownType(other.to_string()))
            }
        }
    }

    async fn handle_ping(&self, envelope: Envelope) -> Result<(), HubError> {
        let payload: PingPayload = serde_json::from_value(envelope.data)
            .map_err(|e| HubError::Decode(e.to_string()))?;
        let pong = Envelope::new(
            "pong",
            json!({ "ping_id": payload.ping_id, "timestamp": now_millis() }),
        );
        self.reply(pong)
    }

    async fn handle_session_associate(&self, envelope: Envelope) -> Result<(), HubError> {
        let payload: SessionAssociatePayload = serde_json::from_value(envelope.data)
            .map_err(|e| HubError::Decode(e.to_string()))?;
        self.hub
            .associate(self.hd1_id.clone(), payload.session_id, Position::default())
            .await
    }

    async fn handle_position_update(&self, envelope: Envelope) -> Result<(), HubError> {
        let payload: PositionUpdatePayload = serde_json::from_value(envelope.data)
            .map_err(|e| HubError::Decode(e.to_string()))?;
        // A drop here (unregistered avatar) is logged by the hub itself and
        // is not fatal to the connection — the client is expected to
        // re-associate or reconnect.
        self.hub
            .update_position(
                self.hd1_id.clone(),
                payload.position,
                payload.rotation,
                payload.camera_position,
            )
            .await;
        Ok(())
    }

    async fn handle_version_check(&self, envelope: Envelope) -> Result<(), HubError> {
        let payload: VersionCheckPayload = serde_json::from_value(envelope.data)
            .map_err(|e| HubError::Decode(e.to_string()))?;
        if payload.js_version != self.hub.server_version() {
            let refresh = Envelope::new("force_refresh", json!({ "clear_storage": true }));
            self.reply(refresh)?;
        }
        Ok(())
    }

    /// Reply directly to this connection's own outbound queue, bypassing
    /// the hub control task entirely — these are always single-recipient,
    /// self-only replies, so (unlike a session broadcast) the encoded
    /// buffer is never shared and can come straight out of the pool.
    fn reply(&self, envelope: Envelope) -> Result<(), HubError> {
        let mut pool = self.pool.borrow_mut();
        let buf = envelope.encode(&mut pool, SizeClass::Control)?;
        let bytes = bytes::Bytes::copy_from_slice(&buf);
        pool.release(SizeClass::Control, buf);
        drop(pool);
        self.self_tx
            .try_send(bytes)
            .map_err(|_| HubError::QueueOverflow)
    }
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
