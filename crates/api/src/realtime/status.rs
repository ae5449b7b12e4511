//! Job status transitions.

use std::sync::Arc;

use chrono::Utc;
use jobline_core::collaborators::CollaboratorError;
use jobline_core::error::CoreError;
use jobline_core::job_status::{authorize_transition, validate_notes, JobStatus, JobStatusEvent};
use jobline_core::protocol::ServerEvent;
use jobline_core::types::JobId;

use super::room::RoomState;
use super::session::Session;
use super::{persistence_failed, RealtimeHub};

impl RealtimeHub {
    /// Validate, persist, cache and fan out one status change.
    ///
    /// Nothing is cached or broadcast unless the store accepted the write.
    pub(crate) async fn transition_status(
        &self,
        session: &Arc<Session>,
        job_id: JobId,
        target: JobStatus,
        notes: Option<String>,
    ) -> Result<(), CoreError> {
        validate_notes(notes.as_deref())?;
        let room = self.joined_room(session, job_id).await?;
        let mut state = room.lock().await;
        state.require_member(session)?;
        state.status()?;

        // The assigned worker may have changed since the join.
        let participants = self.lookup_participants(job_id).await?;
        let role = participants.role_of(session.actor_id).ok_or_else(|| {
            CoreError::Forbidden(format!(
                "Actor {} is no longer a participant of job {job_id}",
                session.actor_id
            ))
        })?;
        state.participants = Some(participants);

        // Another server may have moved the job since the room cached it.
        let from = self.refresh_status(&mut state).await?;

        if let Err(err) = authorize_transition(from, target, role) {
            tracing::info!(
                actor_id = session.actor_id,
                job_id,
                from = %from,
                to = %target,
                role = %role,
                "Rejected status transition"
            );
            return Err(err);
        }

        let event = JobStatusEvent {
            job_id,
            from_status: from,
            to_status: target,
            actor_id: session.actor_id,
            notes,
            timestamp: Utc::now(),
        };
        if let Err(e) = self
            .call(self.collaborators.statuses.write_status(job_id, &event))
            .await
        {
            return Err(match e {
                CollaboratorError::Rejected(message) => {
                    // Lost a race with a write elsewhere; converge on it.
                    if let Err(err) = self.refresh_status(&mut state).await {
                        tracing::warn!(job_id, error = %err, "Status refresh after rejected write failed");
                    }
                    CoreError::InvalidTransition(message)
                }
                other => persistence_failed("write_status", other),
            });
        }

        state.status = Some(target);
        state.status_event = Some(event.clone());
        if !target.tracks_location() {
            state.stop_location_tracking();
        }

        let update = ServerEvent::StatusUpdated { event };
        let delivered = state.broadcast(&update, Some(session.conn_id));
        session.send(&ServerEvent::ack(job_id, "status.transition"));
        self.notify_offline(&state, &update);

        tracing::info!(
            actor_id = session.actor_id,
            job_id,
            from = %from,
            to = %target,
            delivered,
            "Job status updated"
        );
        Ok(())
    }

    /// Reload the job's status from storage into the room cache.
    ///
    /// A change made outside this room is announced to every member.
    pub(crate) async fn refresh_status(&self, state: &mut RoomState) -> Result<JobStatus, CoreError> {
        let job_id = state.job_id;
        let snapshot = self
            .call(self.collaborators.statuses.read_status(job_id))
            .await
            .map_err(|e| persistence_failed("read_status", e))?;
        let previous = state.status;
        let status = snapshot.status;

        if let Some(event) = state.apply_snapshot(snapshot) {
            state.broadcast(&ServerEvent::StatusUpdated { event }, None);
        }
        if previous != Some(status) {
            tracing::info!(job_id, from = ?previous, to = %status, "Room status refreshed from storage");
        }
        Ok(status)
    }
}
