//! The avatar registry: the in-memory presence record bound 1:1 to a
//! connection.
//!
//! Uses a plain `Arc<RwLock<HashMap>>`, the same shape the rest of this
//! codebase reaches for when a map needs to be read from many tasks and
//! written from a few — no extra concurrent-map dependency is pulled in
//! for this.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::HubError;

/// A position in the shared world, meters, IEEE-754 double precision.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// A camera/look rotation, represented as the client sends it: free-form
/// per-axis values rather than a fixed quaternion/euler choice, since the
/// hub never interprets this beyond storing and relaying it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default = "default_w")]
    pub w: f64,
}

fn default_w() -> f64 {
    1.0
}

/// The per-connection presence entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Avatar {
    pub hd1_id: String,
    pub session_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub position: Position,
    #[serde(default)]
    pub rotation: Option<Rotation>,
    #[serde(default)]
    pub camera_position: Option<Position>,
    pub created_at: i64,
}

/// Map of `hd1_id -> Avatar`, safe under concurrent access.
///
/// `Register`, `Remove`, and `UpdatePosition` are the only mutators;
/// `SnapshotSession` lets a reader (including an out-of-process REST
/// mutator) take a point-in-time copy without going through the hub.
#[derive(Debug, Clone, Default)]
pub struct AvatarRegistry {
    inner: Arc<RwLock<HashMap<String, Avatar>>>,
}

impl AvatarRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and insert a new avatar for `hd1_id`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::AlreadyRegistered`] if an avatar for this id is
    /// already present — a connection associates at most once.
    pub fn register(
        &self,
        hd1_id: &str,
        session_id: &str,
        default_position: Position,
    ) -> Result<Avatar, HubError> {
        let mut map = self.inner.write().expect("avatar registry lock poisoned");
        if map.contains_key(hd1_id) {
            return Err(HubError::AlreadyRegistered(hd1_id.to_string()));
        }
        let avatar = Avatar {
            hd1_id: hd1_id.to_string(),
            session_id: session_id.to_string(),
            display_name: None,
            position: default_position,
            rotation: None,
            camera_position: None,
            created_at: now_millis(),
        };
        map.insert(hd1_id.to_string(), avatar.clone());
        Ok(avatar)
    }

    /// Remove the avatar for `hd1_id`, if any. Idempotent.
    pub fn remove(&self, hd1_id: &str) -> Option<Avatar> {
        self.inner
            .write()
            .expect("avatar registry lock poisoned")
            .remove(hd1_id)
    }

    /// Update position (and optionally rotation/camera) for `hd1_id`.
    ///
    /// A no-op if the avatar was removed mid-flight — the connection will
    /// re-associate or reconnect rather than resurrect a stale avatar.
    pub fn update_position(
        &self,
        hd1_id: &str,
        position: Position,
        rotation: Option<Rotation>,
        camera_position: Option<Position>,
    ) -> bool {
        let mut map = self.inner.write().expect("avatar registry lock poisoned");
        if let Some(avatar) = map.get_mut(hd1_id) {
            avatar.position = position;
            if rotation.is_some() {
                avatar.rotation = rotation;
            }
            if camera_position.is_some() {
                avatar.camera_position = camera_position;
            }
            true
        } else {
            false
        }
    }

    pub fn set_display_name(&self, hd1_id: &str, display_name: String) {
        if let Some(avatar) = self
            .inner
            .write()
            .expect("avatar registry lock poisoned")
            .get_mut(hd1_id)
        {
            avatar.display_name = Some(display_name);
        }
    }

    /// A consistent-at-one-instant snapshot of every avatar bound to
    /// `session_id`.
    #[must_use]
    pub fn snapshot_session(&self, session_id: &str) -> Vec<Avatar> {
        self.inner
            .read()
            .expect("avatar registry lock poisoned")
            .values()
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn get(&self, hd1_id: &str) -> Option<Avatar> {
        self.inner
            .read()
            .expect("avatar registry lock poisoned")
            .get(hd1_id)
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().expect("avatar registry lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Position {
        Position { x: 0.0, y: 0.0, z: 0.0 }
    }

    #[test]
    fn register_then_get_round_trips() {
        let registry = AvatarRegistry::new();
        registry.register("conn-1", "s1", origin()).unwrap();
        let avatar = registry.get("conn-1").unwrap();
        assert_eq!(avatar.session_id, "s1");
    }

    #[test]
    fn register_twice_is_already_registered() {
        let registry = AvatarRegistry::new();
        registry.register("conn-1", "s1", origin()).unwrap();
        let err = registry.register("conn-1", "s1", origin()).unwrap_err();
        assert!(matches!(err, HubError::AlreadyRegistered(id) if id == "conn-1"));
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = AvatarRegistry::new();
        registry.register("conn-1", "s1", origin()).unwrap();
        assert!(registry.remove("conn-1").is_some());
        assert!(registry.remove("conn-1").is_none());
    }

    #[test]
    fn update_position_is_noop_after_removal() {
        let registry = AvatarRegistry::new();
        registry.register("conn-1", "s1", origin()).unwrap();
        registry.remove("conn-1");
        let updated = registry.update_position(
            "conn-1",
            Position { x: 1.0, y: 1.0, z: 1.0 },
            None,
            None,
        );
        assert!(!updated);
    }

    #[test]
    fn snapshot_session_only_includes_matching_session() {
        let registry = AvatarRegistry::new();
        registry.register("conn-1", "s1", origin()).unwrap();
        registry.register("conn-2", "s2", origin()).unwrap();
        let snapshot = registry.snapshot_session("s1");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].hd1_id, "conn-1");
    }
}
