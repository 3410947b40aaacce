//! The session index: `session_id -> ordered set of connection refs`.
//!
//! Owned exclusively by the hub control task (see [`crate::hub`]) — unlike
//! the avatar registry, nothing outside that task ever touches this
//! directly, so it carries no internal locking of its own.

use std::collections::HashMap;

/// Maps session id to the ordered list of `hd1_id`s currently associated
/// with it, plus the reverse lookup needed to disassociate a connection
/// without knowing its session ahead of time.
#[derive(Debug, Default)]
pub struct SessionIndex {
    members: HashMap<String, Vec<String>>,
    owner: HashMap<String, String>,
}

impl SessionIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `hd1_id` with `session_id`. If the connection was
    /// previously associated with a different session, it is first
    /// disassociated from it. Idempotent if already a member of
    /// `session_id`.
    pub fn associate(&mut self, hd1_id: &str, session_id: &str) {
        if let Some(previous) = self.owner.get(hd1_id) {
            if previous == session_id {
                return;
            }
            self.disassociate(hd1_id);
        }
        self.members
            .entry(session_id.to_string())
            .or_default()
            .push(hd1_id.to_string());
        self.owner.insert(hd1_id.to_string(), session_id.to_string());
    }

    /// Remove `hd1_id` from whichever session it belongs to, if any.
    /// Returns the session it was removed from. Drops the session entry
    /// entirely once its member list is empty.
    pub fn disassociate(&mut self, hd1_id: &str) -> Option<String> {
        let session_id = self.owner.remove(hd1_id)?;
        if let Some(members) = self.members.get_mut(&session_id) {
            members.retain(|id| id != hd1_id);
            if members.is_empty() {
                self.members.remove(&session_id);
            }
        }
        Some(session_id)
    }

    /// A snapshot of connection ids currently in `session_id`, safe to
    /// iterate without holding any lock (there is none here — the caller
    /// is the sole owner of this struct).
    #[must_use]
    pub fn recipients(&self, session_id: &str) -> Vec<String> {
        self.members.get(session_id).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn session_of(&self, hd1_id: &str) -> Option<String> {
        self.owner.get(hd1_id).cloned()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.members.len()
    }
}
