//! Protocol-level error kinds for the synchronization hub.
//!
//! These are distinct from the `anyhow::Result` used at process boundaries
//! (config loading, socket binding): every variant here names a disposition
//! the caller must act on — terminate the connection, log and drop, or
//! treat as non-fatal.

use std::fmt;

/// A protocol-level failure raised while decoding or dispatching a single frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// Frame was not valid JSON, or exceeded the size limit for its class.
    #[error("decode error: {0}")]
    Decode(String),

    /// `type` field did not match any known inbound message type.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// A state-violating operation (e.g. position update before associate).
    #[error("connection is not associated with a session")]
    NotAssociated,

    /// `Register` was called with an `hd1_id` already present in the registry.
    #[error("hd1_id already registered: {0}")]
    AlreadyRegistered(String),

    /// The recipient's outbound queue was full at enqueue time.
    #[error("outbound queue overflow")]
    QueueOverflow,

    /// The read side hit `pong_wait` without hearing from the client.
    #[error("read deadline exceeded")]
    ReadTimeout,

    /// The write side could not flush a frame within `write_wait`.
    #[error("write deadline exceeded")]
    WriteTimeout,
}

impl HubError {
    /// Whether this error terminates the connection.
    ///
    /// `UnknownType` and `NotAssociated` are locally recovered: log and drop,
    /// keep the connection. Every other kind surfaces as a socket close.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::UnknownType(_) | Self::NotAssociated)
    }
}

/// Display wrapper used for log lines where the `hd1_id` is threaded in separately.
pub(crate) struct WithConn<'a>(pub &'a str, pub &'a HubError);

impl fmt::Display for WithConn<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0, self.1)
    }
}
