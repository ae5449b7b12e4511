use async_trait::async_trait;
use jobline_core::collaborators::{CollaboratorError, PushDispatcher};
use jobline_core::types::ActorId;

/// Dispatcher used when no push gateway is configured: records the
/// notification in the log and reports success.
#[derive(Debug, Default, Clone)]
pub struct TracingPushDispatcher;

#[async_trait]
impl PushDispatcher for TracingPushDispatcher {
    async fn enqueue(
        &self,
        actor_id: ActorId,
        payload: &serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        tracing::info!(
            actor_id,
            event_type = payload.get("type").and_then(|t| t.as_str()).unwrap_or("unknown"),
            "Push notification (no gateway configured)"
        );
        Ok(())
    }
}
