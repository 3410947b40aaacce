//! Application-wide constants for the synchronization hub.
//!
//! Centralizes the timing and sizing constants used across the codec,
//! connection, and hub modules so they are defined once and documented
//! in place.

use std::time::Duration;

// ============================================================================
// Identity
// ============================================================================

/// Protocol/server version compared against `version_check.js_version`.
///
/// Bumping this forces every connected client to `force_refresh` on its next
/// `version_check`.
pub const SERVER_VERSION: &str = "1";

// ============================================================================
// Keepalive
// ============================================================================

/// Read deadline: a connection that sends nothing (not even a pong) for this
/// long is considered dead and the read loop terminates it.
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Write deadline for a single outbound frame.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Interval on which the write loop emits a control ping.
///
/// Kept below `PONG_WAIT` so at least one ping lands inside every read
/// deadline window even under jitter.
pub const PING_PERIOD: Duration = Duration::from_secs(54);

// ============================================================================
// Backpressure
// ============================================================================

/// Capacity of each connection's bounded outbound queue.
///
/// A client whose queue fills to this level is evicted rather than stalling
/// the broadcast planner.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

// ============================================================================
// Frame sizing
// ============================================================================

/// Maximum inbound frame size for control messages (ping, session_associate,
/// version_check, client_info).
pub const MAX_CONTROL_FRAME_BYTES: usize = 512;

/// Maximum inbound frame size for `avatar_position_update`.
pub const MAX_POSITION_FRAME_BYTES: usize = 4 * 1024;
