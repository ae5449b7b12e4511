//! Room join and leave.

use std::sync::Arc;

use jobline_core::error::CoreError;
use jobline_core::protocol::ServerEvent;
use jobline_core::types::{JobId, MessageId};

use super::room::{Room, RoomState};
use super::session::Session;
use super::{persistence_failed, RealtimeHub};

impl RealtimeHub {
    /// Attach `session` to the job's room and send it a resync payload.
    ///
    /// Participation is re-validated against the participant lookup on every
    /// join.
    pub(crate) async fn join(
        &self,
        session: &Arc<Session>,
        job_id: JobId,
        cursor: Option<MessageId>,
    ) -> Result<(), CoreError> {
        let participants = self.lookup_participants(job_id).await?;
        if participants.role_of(session.actor_id).is_none() {
            tracing::warn!(
                actor_id = session.actor_id,
                job_id,
                "Rejected join from non-participant"
            );
            return Err(CoreError::Forbidden(format!(
                "Actor {} is not a participant of job {job_id}",
                session.actor_id
            )));
        }

        loop {
            let room = self.rooms.get_or_create(job_id).await;
            let mut state = room.lock().await;
            // Retired between lookup and lock; fetch a fresh one.
            if room.is_removed() {
                continue;
            }

            state.participants = Some(participants);
            let result = self.attach(session, &mut state, cursor).await;
            drop(state);

            if result.is_err() {
                self.rooms.release(&room).await;
            }
            return result;
        }
    }

    async fn attach(
        &self,
        session: &Arc<Session>,
        state: &mut RoomState,
        cursor: Option<MessageId>,
    ) -> Result<(), CoreError> {
        let job_id = state.job_id;
        if !state.is_seeded() {
            let snapshot = self
                .call(self.collaborators.statuses.read_status(job_id))
                .await
                .map_err(|e| persistence_failed("read_status", e))?;
            let latest_id = self
                .call(self.collaborators.messages.latest_id(job_id))
                .await
                .map_err(|e| persistence_failed("latest_id", e))?;
            state.seed(snapshot, latest_id, self.config.room_message_cache);
            tracing::debug!(job_id, latest_id, "Room seeded");
        } else if let Err(err) = self.refresh_status(state).await {
            tracing::warn!(job_id, error = %err, "Serving cached status on join");
        }

        let mut resync = self.resync(state, cursor).await?;
        self.deliver_backlog(state, &mut resync.messages, session.actor_id);

        state.add_member(session);
        session.add_room(job_id);
        session.send(&ServerEvent::RoomJoined { resync });
        tracing::info!(
            actor_id = session.actor_id,
            conn_id = %session.conn_id,
            job_id,
            members = state.member_count(),
            "Joined room"
        );
        Ok(())
    }

    /// Explicit `room.leave`.
    pub(crate) async fn leave(&self, session: &Arc<Session>, job_id: JobId) -> Result<(), CoreError> {
        if !session.remove_room(job_id) {
            return Err(CoreError::InvalidEvent(format!("Not in room {job_id}")));
        }
        if let Some(room) = self.rooms.get(job_id).await {
            self.detach(session, &room).await;
        }
        session.send(&ServerEvent::RoomLeft { job_id });
        Ok(())
    }

    /// Leave every room `session` is in.
    pub(crate) async fn leave_all(&self, session: &Arc<Session>) {
        for job_id in session.take_rooms() {
            if let Some(room) = self.rooms.get(job_id).await {
                self.detach(session, &room).await;
            }
        }
    }

    async fn detach(&self, session: &Session, room: &Arc<Room>) {
        {
            let mut state = room.lock().await;
            if !state.remove_member(session.conn_id) {
                return;
            }
            if let Some(conn_id) = state.typing.cancel(session.actor_id) {
                state.broadcast(
                    &ServerEvent::TypingIndicator {
                        job_id: room.job_id,
                        sender_id: session.actor_id,
                        is_typing: false,
                    },
                    Some(conn_id),
                );
            }
            if state.is_worker(session.actor_id) {
                state.mark_location_stale();
            }
            tracing::info!(
                actor_id = session.actor_id,
                conn_id = %session.conn_id,
                job_id = room.job_id,
                members = state.member_count(),
                "Left room"
            );
        }
        self.rooms.release(room).await;
    }
}
