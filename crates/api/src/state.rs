use std::sync::Arc;

use crate::config::ServerConfig;
use crate::realtime::RealtimeHub;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: jobline_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Session and room registries plus the real-time subsystems.
    pub hub: Arc<RealtimeHub>,
}
