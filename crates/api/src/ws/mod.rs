//! WebSocket transport for job rooms.
//!
//! Provides the HTTP upgrade handler used by Axum routes and the heartbeat
//! task that pings sessions and expires stale claims.

mod handler;
mod heartbeat;

pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
