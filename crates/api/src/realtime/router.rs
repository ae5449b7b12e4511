//! Inbound event dispatch.

use std::sync::Arc;

use jobline_core::error::CoreError;
use jobline_core::protocol::{parse_client_event, ClientEvent};

use super::session::Session;
use super::RealtimeHub;

/// What the connection task should do after an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Continue,
    /// The session was closed (expired claim); stop reading.
    Disconnect,
}

impl RealtimeHub {
    /// Parse, rate-limit and dispatch one inbound text frame.
    ///
    /// Every rejection is reported to the originating session only.
    pub async fn route(self: &Arc<Self>, session: &Arc<Session>, raw: &str) -> RouteOutcome {
        session.touch();

        let result = match parse_client_event(raw) {
            Ok(event) => self.dispatch(session, event).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => RouteOutcome::Continue,
            Err(err) if err.is_fatal() => {
                tracing::info!(
                    actor_id = session.actor_id,
                    conn_id = %session.conn_id,
                    error = %err,
                    "Closing session"
                );
                session.close(Some(&err));
                RouteOutcome::Disconnect
            }
            Err(err) => {
                match &err {
                    CoreError::InvalidEvent(_) => {
                        tracing::warn!(actor_id = session.actor_id, error = %err, "Rejected event")
                    }
                    CoreError::PersistenceFailed(_) => {
                        tracing::error!(actor_id = session.actor_id, error = %err, "Event not applied")
                    }
                    _ => tracing::debug!(actor_id = session.actor_id, error = %err, "Rejected event"),
                }
                session.send_error(&err);
                RouteOutcome::Continue
            }
        }
    }

    async fn dispatch(self: &Arc<Self>, session: &Arc<Session>, event: ClientEvent) -> Result<(), CoreError> {
        session.ensure_active()?;
        if let Some(kind) = event.kind() {
            session.check_rate(kind)?;
        }

        match event {
            ClientEvent::Authenticate { .. } => Err(CoreError::InvalidEvent(
                "Session is already authenticated".into(),
            )),
            ClientEvent::RoomJoin {
                job_id,
                last_seen_message_id,
            } => self.join(session, job_id, last_seen_message_id).await,
            ClientEvent::RoomLeave { job_id } => self.leave(session, job_id).await,
            ClientEvent::StatusTransition {
                job_id,
                target_status,
                notes,
            } => {
                self.transition_status(session, job_id, target_status, notes)
                    .await
            }
            ClientEvent::LocationReport {
                job_id,
                lat,
                lng,
                captured_at,
            } => {
                self.report_location(session, job_id, lat, lng, captured_at)
                    .await
            }
            ClientEvent::ChatSend {
                job_id,
                body,
                attachment_ref,
            } => self
                .send_message(session, job_id, body, attachment_ref)
                .await
                .map(|_| ()),
            ClientEvent::ChatTyping { job_id, is_typing } => {
                self.set_typing(session, job_id, is_typing).await
            }
            ClientEvent::ChatRead { job_id, message_id } => {
                self.mark_read(session, job_id, message_id).await
            }
        }
    }
}
