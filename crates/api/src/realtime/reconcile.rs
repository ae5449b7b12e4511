//! Resync payloads for (re)joining sessions.

use jobline_core::chat::ChatMessage;
use jobline_core::error::CoreError;
use jobline_core::protocol::ResyncPayload;
use jobline_core::types::MessageId;

use super::room::RoomState;
use super::{persistence_failed, RealtimeHub};

impl RealtimeHub {
    /// Build the snapshot a joining session needs to converge with the room.
    ///
    /// Messages come from the room cache when it covers the requested range
    /// and from the message store otherwise.
    pub(crate) async fn resync(
        &self,
        state: &RoomState,
        cursor: Option<MessageId>,
    ) -> Result<ResyncPayload, CoreError> {
        let status = state.status()?;
        let (messages, has_more) = match cursor {
            Some(cursor) => self.messages_after(state, cursor).await?,
            None => self.latest_messages(state).await?,
        };

        Ok(ResyncPayload {
            job_id: state.job_id,
            status,
            status_event: state.status_event.clone(),
            location: state
                .location
                .clone()
                .filter(|_| status.tracks_location()),
            location_stale: state.location_stale,
            messages,
            has_more,
        })
    }

    /// Messages newer than `cursor`, capped at `resync_max_messages`.
    async fn messages_after(
        &self,
        state: &RoomState,
        cursor: MessageId,
    ) -> Result<(Vec<ChatMessage>, bool), CoreError> {
        let limit = self.config.resync_max_messages;
        if let Some(range) = state.messages.after(cursor, limit) {
            return Ok((range.messages, range.has_more));
        }

        let abandoned = state.abandoned_messages.len();
        let mut messages = self
            .call(
                self.collaborators
                    .messages
                    .query_after(state.job_id, cursor, limit + 1 + abandoned),
            )
            .await
            .map_err(|e| persistence_failed("query_after", e))?;
        messages.retain(|m| !state.abandoned_messages.contains(&m.id));
        let has_more = messages.len() > limit;
        messages.truncate(limit);
        Ok((messages, has_more))
    }

    /// The newest `resync_window` messages. `has_more` reports older history.
    async fn latest_messages(
        &self,
        state: &RoomState,
    ) -> Result<(Vec<ChatMessage>, bool), CoreError> {
        let window = self.config.resync_window;
        if let Some(messages) = state.messages.latest(window) {
            let has_more = state.messages.len() > window || state.messages.floor() > 0;
            return Ok((messages, has_more));
        }

        let abandoned = state.abandoned_messages.len();
        let mut messages = self
            .call(
                self.collaborators
                    .messages
                    .query_latest(state.job_id, window + 1 + abandoned),
            )
            .await
            .map_err(|e| persistence_failed("query_latest", e))?;
        messages.retain(|m| !state.abandoned_messages.contains(&m.id));
        let excess = messages.len().saturating_sub(window);
        messages.drain(..excess);
        Ok((messages, excess > 0))
    }
}
