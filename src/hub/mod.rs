//! The hub core: the single-writer control task that owns the
//! connections-by-id map and the session index, and the broadcast planner
//! that fans messages out from it.
//!
//! Rather than four raw `mpsc` receivers polled with `tokio::select!`, the
//! four logical input channels (register, unregister, broadcast_all,
//! broadcast_session) are modeled as variants of one [`HubCommand`] enum
//! drained by a single control task. The order the task processes commands
//! in is a total order across every connection; nothing about having four
//! logical inputs requires four physical channels.

mod broadcast;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

use crate::avatar::{Avatar, AvatarRegistry, Position, Rotation};
use crate::codec::Envelope;
use crate::error::HubError;
use crate::session::SessionIndex;

pub use broadcast::BroadcastPlanner;

/// Capacity of the command channel feeding the control task. Generous
/// relative to the per-connection outbound queue (the backpressure policy
/// lives there) since this channel carries control events, not per-frame
/// payloads.
const COMMAND_CHANNEL_CAPACITY: usize = 1024;

/// Everything the control task can be asked to do.
#[derive(Debug)]
pub enum HubCommand {
    Register {
        hd1_id: String,
        outbound: mpsc::Sender<Bytes>,
        /// Abort handles for this connection's read and write tasks. Held so
        /// that a hub-initiated eviction (queue overflow) can force both
        /// tasks to stop rather than wait for them to notice on their own.
        abort_handles: Vec<AbortHandle>,
    },
    Unregister {
        hd1_id: String,
    },
    Associate {
        hd1_id: String,
        session_id: String,
        position: Position,
        reply: oneshot::Sender<Result<(), HubError>>,
    },
    UpdatePosition {
        hd1_id: String,
        position: Position,
        rotation: Option<Rotation>,
        camera_position: Option<Position>,
    },
    BroadcastAll {
        envelope: Envelope,
    },
    BroadcastSession {
        session_id: String,
        envelope: Envelope,
        exclude: Option<String>,
    },
}

/// A cloneable handle to a running hub. Cheap to clone; every clone talks
/// to the same control task.
#[derive(Debug, Clone)]
pub struct Hub {
    commands: mpsc::Sender<HubCommand>,
    avatars: AvatarRegistry,
    server_version: String,
    connection_count: Arc<AtomicUsize>,
    session_count: Arc<AtomicUsize>,
}

impl Hub {
    /// Spawn the control task and return a handle to it plus its
    /// `JoinHandle`.
    #[must_use]
    pub fn spawn(server_version: String) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let avatars = AvatarRegistry::new();
        let connection_count = Arc::new(AtomicUsize::new(0));
        let session_count = Arc::new(AtomicUsize::new(0));
        let core = HubCore::new(avatars.clone(), connection_count.clone(), session_count.clone());
        let handle = tokio::spawn(core.run(rx));
        (
            Self {
                commands: tx,
                avatars,
                server_version,
                connection_count,
                session_count,
            },
            handle,
        )
    }

    #[must_use]
    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Connections currently registered with the control task, for the
    /// health endpoint. Updated by the control task on every register,
    /// unregister, and eviction.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::Relaxed)
    }

    /// Sessions with at least one member, for the health endpoint.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.session_count.load(Ordering::Relaxed)
    }

    /// Snapshot reads of the avatar registry bypass the control task
    /// entirely — the registry is self-locking, matching the design's
    /// allowance for external mutators to read without traversing the hub.
    #[must_use]
    pub fn snapshot_session(&self, session_id: &str) -> Vec<Avatar> {
        self.avatars.snapshot_session(session_id)
    }

    /// Register a newly-accepted connection. `abort_handles` lets the
    /// control task force-terminate the connection's tasks later if it
    /// evicts this connection as a slow client.
    pub async fn register(
        &self,
        hd1_id: String,
        outbound: mpsc::Sender<Bytes>,
        abort_handles: Vec<AbortHandle>,
    ) {
        let _ = self
            .commands
            .send(HubCommand::Register {
                hd1_id,
                outbound,
                abort_handles,
            })
            .await;
    }

    pub async fn unregister(&self, hd1_id: String) {
        let _ = self.commands.send(HubCommand::Unregister { hd1_id }).await;
    }

    pub async fn associate(
        &self,
        hd1_id: String,
        session_id: String,
        position: Position,
    ) -> Result<(), HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(HubCommand::Associate {
                hd1_id,
                session_id,
                position,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return Err(HubError::NotAssociated);
        }
        reply_rx.await.unwrap_or(Err(HubError::NotAssociated))
    }

    pub async fn update_position(
        &self,
        hd1_id: String,
        position: Position,
        rotation: Option<Rotation>,
        camera_position: Option<Position>,
    ) {
        let _ = self
            .commands
            .send(HubCommand::UpdatePosition {
                hd1_id,
                position,
                rotation,
                camera_position,
            })
            .await;
    }

    /// Broadcast to every connected client regardless of session. Used by
    /// out-of-process REST mutators and for process-wide announcements.
    pub async fn broadcast_all(&self, envelope: Envelope) {
        let _ = self.commands.send(HubCommand::BroadcastAll { envelope }).await;
    }

    /// Broadcast to every member of `session_id`, optionally excluding one
    /// `hd1_id`. The primary entry point for REST handlers that mutate
    /// entities/scenes and need to notify the session.
    pub async fn broadcast_session(&self, session_id: String, envelope: Envelope, exclude: Option<String>) {
        let _ = self
            .commands
            .send(HubCommand::BroadcastSession {
                session_id,
                envelope,
                exclude,
            })
            .await;
    }
}

/// A registered connection's outbound queue plus the abort handles for its
/// read and write tasks, so the control task can force both to stop
/// immediately when it evicts a slow client rather than waiting for the
/// write task to notice its queue closed.
struct ConnectionHandle {
    outbound: mpsc::Sender<Bytes>,
    abort_handles: Vec<AbortHandle>,
}

/// The owning state of the control task. Never shared: exactly one task
/// ever touches `connections` and `sessions`.
struct HubCore {
    connections: HashMap<String, ConnectionHandle>,
    sessions: SessionIndex,
    avatars: AvatarRegistry,
    planner: BroadcastPlanner,
    connection_count: Arc<AtomicUsize>,
    session_count: Arc<AtomicUsize>,
}

impl HubCore {
    fn new(
        avatars: AvatarRegistry,
        connection_count: Arc<AtomicUsize>,
        session_count: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            connections: HashMap::new(),
            sessions: SessionIndex::new(),
            avatars,
            planner: BroadcastPlanner::new(),
            connection_count,
            session_count,
        }
    }

    fn publish_counts(&self) {
        self.connection_count
            .store(self.connections.len(), Ordering::Relaxed);
        self.session_count
            .store(self.sessions.session_count(), Ordering::Relaxed);
    }

    async fn run(mut self, mut commands: mpsc::Receiver<HubCommand>) {
        info!("hub control task started");
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }
        info!("hub control task stopped: command channel closed");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register {
                hd1_id,
                outbound,
                abort_handles,
            } => self.on_register(hd1_id, outbound, abort_handles),
            HubCommand::Unregister { hd1_id } => self.on_unregister(&hd1_id),
            HubCommand::Associate {
                hd1_id,
                session_id,
                position,
                reply,
            } => {
                let result = self.on_associate(&hd1_id, &session_id, position);
                let _ = reply.send(result);
            }
            HubCommand::UpdatePosition {
                hd1_id,
                position,
                rotation,
                camera_position,
            } => self.on_update_position(&hd1_id, position, rotation, camera_position),
            HubCommand::BroadcastAll { envelope } => self.broadcast_all(&envelope),
            HubCommand::BroadcastSession {
                session_id,
                envelope,
                exclude,
            } => self.broadcast_session(&session_id, envelope, exclude.as_deref()),
        }
    }

    fn on_register(
        &mut self,
        hd1_id: String,
        outbound: mpsc::Sender<Bytes>,
        abort_handles: Vec<AbortHandle>,
    ) {
        debug!("register {hd1_id}");
        self.connections.insert(
            hd1_id,
            ConnectionHandle {
                outbound,
                abort_handles,
            },
        );
        self.publish_counts();
        self.broadcast_client_count();
    }

    fn on_unregister(&mut self, hd1_id: &str) {
        if let Some(handle) = self.connections.remove(hd1_id) {
            for abort in handle.abort_handles {
                abort.abort();
            }
        }
        let session_id = self.sessions.disassociate(hd1_id);
        let avatar = self.avatars.remove(hd1_id);
        self.publish_counts();
        if let (Some(session_id), Some(avatar)) = (session_id, avatar) {
            info!("unregister {hd1_id}: removing avatar from session {session_id}");
            let envelope = Envelope::new("entity_deleted", json!({ "entity_id": avatar.hd1_id }));
            self.broadcast_session(&session_id, envelope, None);
        } else {
            debug!("unregister {hd1_id}: no avatar to remove");
        }
        self.broadcast_client_count();
    }

    fn on_associate(
        &mut self,
        hd1_id: &str,
        session_id: &str,
        position: Position,
    ) -> Result<(), HubError> {
        if self.avatars.get(hd1_id).is_some() {
            warn!("{hd1_id} attempted to re-associate; terminating as a protocol violation");
            return Err(HubError::AlreadyRegistered(hd1_id.to_string()));
        }

        // Snapshot peers before registering self, so the backfill below
        // never includes the connection's own avatar.
        let peers = self.avatars.snapshot_session(session_id);
        self.sessions.associate(hd1_id, session_id);
        let own_avatar = self.avatars.register(hd1_id, session_id, position)?;
        self.publish_counts();
        info!("{hd1_id} associated with session {session_id}");

        for peer in &peers {
            let envelope = Envelope::new("entity_created", json!({ "entity": peer }))
                .with_session(session_id.to_string());
            self.send_to(hd1_id, session_id, envelope);
        }
        let own_created = Envelope::new("entity_created", json!({ "entity": own_avatar }))
            .with_session(session_id.to_string());
        self.send_to(hd1_id, session_id, own_created);

        let broadcast_created = Envelope::new("entity_created", json!({ "entity": own_avatar }));
        self.broadcast_session(session_id, broadcast_created, Some(hd1_id));

        Ok(())
    }

    fn on_update_position(
        &mut self,
        hd1_id: &str,
        position: Position,
        rotation: Option<Rotation>,
        camera_position: Option<Position>,
    ) {
        if !self
            .avatars
            .update_position(hd1_id, position, rotation, camera_position)
        {
            debug!("{hd1_id} sent a position update for an unregistered avatar; dropping");
            return;
        }
        let Some(session_id) = self.sessions.session_of(hd1_id) else {
            debug!("{hd1_id} has an avatar but no session; dropping broadcast");
            return;
        };
        let envelope = Envelope::new(
            "avatar_position_update",
            serde_json::to_value(PositionUpdateData {
                hd1_id,
                position,
                rotation,
                camera_position,
            })
            .unwrap_or_default(),
        );
        self.broadcast_session(&session_id, envelope, Some(hd1_id));
    }

    fn broadcast_all(&mut self, envelope: &Envelope) {
        let payload = encode(envelope);
        let mut dead = Vec::new();
        for (hd1_id, handle) in &self.connections {
            if handle.outbound.try_send(payload.clone()).is_err() {
                dead.push(hd1_id.clone());
            }
        }
        self.evict_all(dead);
    }

    /// Broadcast `envelope` to every connection in `session_id`, stamping
    /// it with the session's next sequence number first, and optionally
    /// excluding one `hd1_id` (the originator, for fan-out messages).
    fn broadcast_session(&mut self, session_id: &str, envelope: Envelope, exclude: Option<&str>) {
        let stamped = self.planner.stamp(session_id, envelope);
        let payload = encode(&stamped);

        let members = self.sessions.recipients(session_id);
        let recipients: Vec<String> = BroadcastPlanner::recipients(&members, exclude)
            .into_iter()
            .map(str::to_owned)
            .collect();

        let mut dead = Vec::new();
        for hd1_id in recipients {
            if let Some(handle) = self.connections.get(&hd1_id) {
                if handle.outbound.try_send(payload.clone()).is_err() {
                    dead.push(hd1_id);
                }
            }
        }
        self.evict_all(dead);
    }

    /// Send a session-tagged envelope to exactly one connection (used for
    /// the associate-time backfill), stamping it the same way a broadcast
    /// would be.
    fn send_to(&mut self, hd1_id: &str, session_id: &str, envelope: Envelope) {
        let stamped = self.planner.stamp(session_id, envelope);
        let payload = encode(&stamped);
        if let Some(handle) = self.connections.get(hd1_id) {
            if handle.outbound.try_send(payload).is_err() {
                self.evict_all(vec![hd1_id.to_string()]);
            }
        }
    }

    /// Evict connections whose queue was found full during a broadcast
    /// pass. A full queue means the client is slow; the policy is to
    /// terminate it rather than stall everyone else.
    fn evict_all(&mut self, hd1_ids: Vec<String>) {
        for hd1_id in hd1_ids {
            warn!("evicting slow client {hd1_id}: outbound queue overflow");
            self.on_unregister(&hd1_id);
        }
    }

    fn broadcast_client_count(&mut self) {
        let envelope = Envelope::new("client_count", json!({ "count": self.connections.len() }));
        self.broadcast_all(&envelope);
    }
}

fn encode(envelope: &Envelope) -> Bytes {
    Bytes::from(serde_json::to_vec(envelope).unwrap_or_default())
}

/// The `data` payload of an outbound `avatar_position_update`. `rotation`
/// and `camera_position` are omitted entirely when absent rather than
/// serialized as explicit `null`, matching the optional-field shape the
/// inbound side already uses.
#[derive(Debug, Serialize)]
struct PositionUpdateData<'a> {
    hd1_id: &'a str,
    position: Position,
    #[serde(skip_serializing_if = "Option::is_none")]
    rotation: Option<Rotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    camera_position: Option<Position>,
}
