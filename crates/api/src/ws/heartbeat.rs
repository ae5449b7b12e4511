use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::realtime::RealtimeHub;

/// Spawn a background task that periodically pings every session, closes
/// sessions whose claim has expired, and retires idle rooms.
///
/// The task runs until `cancel` fires.
pub fn start_heartbeat(
    hub: Arc<RealtimeHub>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(hub.config().heartbeat_interval);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Heartbeat cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let count = hub.sessions().connection_count().await;
                    tracing::debug!(count, "WebSocket heartbeat");
                    hub.sweep().await;
                }
            }
        }
    })
}
