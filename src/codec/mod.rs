//! The wire codec: a JSON envelope, size-class limits, and the small
//! buffer pool that backs decoding.
//!
//! The wire format is a single JSON object per text frame rather than a
//! `[len][type][payload]` binary frame — the transport is an
//! HTTP-upgraded WebSocket, which already frames messages for us.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{MAX_CONTROL_FRAME_BYTES, MAX_POSITION_FRAME_BYTES};
use crate::error::HubError;

/// Which size limit applies to a frame, chosen by the caller from context
/// (e.g. the message `type` already parsed, or the connection's current
/// expectation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Control,
    Position,
}

impl SizeClass {
    #[must_use]
    pub fn limit(self) -> usize {
        match self {
            Self::Control => MAX_CONTROL_FRAME_BYTES,
            Self::Position => MAX_POSITION_FRAME_BYTES,
        }
    }
}

/// The canonical message envelope, both inbound and outbound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    pub data: Value,
}

impl Envelope {
    /// Build an outbound envelope stamped with the current wall clock.
    #[must_use]
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            timestamp: now_millis(),
            session_id: None,
            seq: None,
            data,
        }
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Encode to a JSON byte buffer, reusing a pooled buffer when one is
    /// available.
    ///
    /// # Errors
    ///
    /// Never fails in practice (the envelope is always representable as
    /// JSON); the `Result` exists because `serde_json` is fallible.
    pub fn encode(&self, pool: &mut BufferPool, class: SizeClass) -> Result<Vec<u8>, HubError> {
        let mut buf = pool.acquire(class);
        buf.clear();
        serde_json::to_writer(&mut buf, self).map_err(|e| HubError::Decode(e.to_string()))?;
        Ok(buf)
    }

    /// Decode and size-check a single inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Decode`] if the frame exceeds `class`'s limit or
    /// is not valid JSON matching the envelope shape.
    pub fn decode(raw: &[u8], class: SizeClass) -> Result<Self, HubError> {
        if raw.len() > class.limit() {
            return Err(HubError::Decode(format!(
                "frame of {} bytes exceeds {} byte limit",
                raw.len(),
                class.limit()
            )));
        }
        serde_json::from_slice(raw).map_err(|e| HubError::Decode(e.to_string()))
    }

    /// Peek the `type` field of a raw frame without fully decoding it, so
    /// the caller can pick the right [`SizeClass`] before enforcing it.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Decode`] if the frame is not a JSON object with
    /// a string `type` field, or exceeds the control-size cap (the largest
    /// a frame may be before its real type, and therefore its real size
    /// class, is known).
    pub fn peek_type(raw: &[u8]) -> Result<String, HubError> {
        if raw.len() > MAX_POSITION_FRAME_BYTES {
            return Err(HubError::Decode(format!(
                "frame of {} bytes exceeds maximum {} bytes",
                raw.len(),
                MAX_POSITION_FRAME_BYTES
            )));
        }
        let value: Value =
            serde_json::from_slice(raw).map_err(|e| HubError::Decode(e.to_string()))?;
        value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| HubError::Decode("missing \"type\" field".to_string()))
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A free-list buffer pool keyed by size class.
///
/// Mirrors the hand-rolled-over-crate posture used for small wire-level
/// utilities elsewhere in this codebase: allocation pooling here is a
/// handful of `Vec::clear`-and-reuse calls, not a dependency.
#[derive(Debug, Default)]
pub struct BufferPool {
    control: Vec<Vec<u8>>,
    position: Vec<Vec<u8>>,
}

impl BufferPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&mut self, class: SizeClass) -> Vec<u8> {
        let free_list = match class {
            SizeClass::Control => &mut self.control,
            SizeClass::Position => &mut self.position,
        };
        free_list
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(class.limit()))
    }

    /// Return a buffer to its size class's free list for reuse.
    pub fn release(&mut self, class: SizeClass, buf: Vec<u8>) {
        let free_list = match class {
            SizeClass::Control => &mut self.control,
            SizeClass::Position => &mut self.position,
        };
        if free_list.len() < 64 {
            free_list.push(buf);
        }
    }
}
