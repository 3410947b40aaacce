//! The broadcast planner: recipient computation and sequence stamping.
//!
//! Kept separate from [`super::HubCore`] so the "who gets this and in what
//! order" logic is a small, independently testable unit — the control
//! task still performs the actual non-blocking enqueue and eviction, since
//! only it holds the connections map.

use std::collections::HashMap;

use crate::codec::Envelope;

/// Computes recipients and assigns per-session sequence numbers.
///
/// Holds no connection state; it only tracks the monotonic `seq` counter
/// per session, mirroring the single piece of ordering state the design
/// calls "the only authoritative ordering the hub provides."
#[derive(Debug, Default)]
pub struct BroadcastPlanner {
    seq: HashMap<String, u64>,
}

impl BroadcastPlanner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp `envelope` with `session_id` and the session's next sequence
    /// number, starting at 1 and incrementing before each stamp.
    #[must_use]
    pub fn stamp(&mut self, session_id: &str, envelope: Envelope) -> Envelope {
        let counter = self.seq.entry(session_id.to_string()).or_insert(0);
        *counter += 1;
        envelope.with_session(session_id.to_string()).with_seq(*counter)
    }

    /// Filter a session's member snapshot down to actual recipients,
    /// dropping the originator if one is excluded.
    #[must_use]
    pub fn recipients<'a>(members: &'a [String], exclude: Option<&str>) -> Vec<&'a str> {
        members
            .iter()
            .map(String::as_str)
            .filter(|id| Some(*id) != exclude)
            .collect()
    }
}
