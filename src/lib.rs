//! scenehub — a realtime, multi-tenant synchronization hub for a shared
//! virtual 3D world.
//!
//! Accepts many simultaneous WebSocket connections, groups them by
//! session, and fans out authoritative scene-graph deltas (entity
//! created/updated/deleted, avatar position) at high frequency without
//! losing liveness when an individual client stalls. Persistence,
//! authentication, and the REST surface that mutates entities/scenes are
//! out of scope here: they are collaborators that hold a [`hub::Hub`]
//! handle and call into it.

pub mod avatar;
pub mod codec;
pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod server;
pub mod session;

pub use config::Config;
pub use error::HubError;
pub use hub::Hub;
pub use server::AppState;
