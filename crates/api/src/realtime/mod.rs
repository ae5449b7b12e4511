//! Real-time job room coordination.
//!
//! [`RealtimeHub`] ties together the session registry, the room registry and
//! the per-event subsystems (status, location, messaging, reconciliation).
//! Every subsystem call takes the originating [`Session`] explicitly; there is
//! no ambient connection state.

mod location;
mod membership;
mod messaging;
mod reconcile;
pub mod room;
mod router;
pub mod session;
mod status;

use std::future::Future;
use std::sync::Arc;

use axum::extract::ws::Message;
use chrono::Utc;
use jobline_core::collaborators::{
    CollaboratorError, EtaEstimator, IdentityVerifier, JobDirectory, JobStatusStore,
    LocationHistory, MessageStore, Participants, VerifiedClaim,
};
use jobline_core::error::CoreError;
use jobline_core::job_status::{JobStatus, JobStatusEvent};
use jobline_core::location::LocationSample;
use jobline_core::protocol::ServerEvent;
use jobline_core::types::{ActorId, JobId};
use jobline_events::PushFallback;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::RealtimeConfig;

pub use room::{Room, RoomRegistry, RoomState};
pub use router::RouteOutcome;
pub use session::{Session, SessionRegistry};

/// External services the hub depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentityVerifier>,
    pub jobs: Arc<dyn JobDirectory>,
    pub statuses: Arc<dyn JobStatusStore>,
    pub messages: Arc<dyn MessageStore>,
    pub eta: Arc<dyn EtaEstimator>,
    pub location_history: Option<Arc<dyn LocationHistory>>,
}

/// Point-in-time view of a room, served over HTTP.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    pub status_event: Option<JobStatusEvent>,
    /// Participants with a live connection in the room.
    pub online: Vec<ActorId>,
    pub location: Option<LocationSample>,
    pub location_stale: bool,
}

pub struct RealtimeHub {
    collaborators: Collaborators,
    sessions: SessionRegistry,
    rooms: RoomRegistry,
    push: PushFallback,
    config: RealtimeConfig,
}

impl RealtimeHub {
    pub fn new(collaborators: Collaborators, push: PushFallback, config: RealtimeConfig) -> Self {
        Self {
            collaborators,
            sessions: SessionRegistry::new(),
            rooms: RoomRegistry::new(),
            push,
            config,
        }
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    /// Bound a collaborator call by the configured timeout.
    pub(crate) async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, CollaboratorError>>,
    ) -> Result<T, CollaboratorError> {
        tokio::time::timeout(self.config.collaborator_timeout, fut)
            .await
            .unwrap_or(Err(CollaboratorError::Timeout))
    }

    // -- session lifecycle ---------------------------------------------------

    /// Verify a signed claim through the identity collaborator.
    pub async fn verify_claim(&self, token: &str) -> Result<VerifiedClaim, CoreError> {
        let claim = self
            .call(self.collaborators.identity.verify_claim(token))
            .await
            .map_err(|e| {
                tracing::debug!(error = %e, "Claim verification failed");
                match e {
                    CollaboratorError::Timeout | CollaboratorError::Unavailable(_) => {
                        CoreError::Unauthorized("identity service unavailable".into())
                    }
                    CollaboratorError::NotFound(m) | CollaboratorError::Rejected(m) => {
                        CoreError::Unauthorized(m)
                    }
                }
            })?;
        if claim.expires_at <= Utc::now() {
            return Err(CoreError::Unauthorized("claim expired".into()));
        }
        Ok(claim)
    }

    /// Complete the handshake: verify the claim and register a new session.
    ///
    /// A live session for the same actor is superseded: it receives
    /// `error{Unauthorized}`, is closed, and leaves all its rooms.
    pub async fn authenticate(
        &self,
        token: &str,
    ) -> Result<(Arc<Session>, mpsc::UnboundedReceiver<Message>), CoreError> {
        let claim = self.verify_claim(token).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new(
            claim.actor_id,
            claim.role,
            claim.expires_at,
            tx,
            self.config.rate_limits,
        ));

        if let Some(previous) = self.sessions.register(Arc::clone(&session)).await {
            tracing::info!(
                actor_id = previous.actor_id,
                conn_id = %previous.conn_id,
                "Superseding previous connection"
            );
            previous.close(Some(&CoreError::Unauthorized(
                "superseded by a newer connection".into(),
            )));
            self.leave_all(&previous).await;
        }

        tracing::info!(
            actor_id = session.actor_id,
            role = %session.role,
            conn_id = %session.conn_id,
            "Session authenticated"
        );
        Ok((session, rx))
    }

    /// Tear down a session: unregister it and leave every room it joined.
    /// Safe to call more than once.
    pub async fn disconnect(&self, session: &Arc<Session>) {
        session.cancellation().cancel();
        self.sessions.remove(session).await;
        self.leave_all(session).await;
    }

    /// Heartbeat sweep: ping every session, drop those whose claim expired,
    /// and retire idle rooms.
    pub async fn sweep(&self) {
        self.sessions.ping_all().await;

        for session in self.sessions.expired(Utc::now()).await {
            tracing::info!(
                actor_id = session.actor_id,
                conn_id = %session.conn_id,
                "Claim expired, closing session"
            );
            session.close(Some(&CoreError::Unauthorized("claim expired".into())));
            self.disconnect(&session).await;
        }

        let retired = self.rooms.sweep_idle().await;
        if retired > 0 {
            tracing::debug!(retired, "Retired idle rooms");
        }
    }

    /// Close every session with a Close frame. Used during graceful shutdown.
    pub async fn shutdown(&self) {
        let sessions = self.sessions.drain().await;
        let count = sessions.len();
        for session in &sessions {
            session.close(None);
            self.leave_all(session).await;
        }
        for room in self.rooms.all().await {
            room.lock().await.cancel_timers();
        }
        tracing::info!(count, "Closed all sessions");
    }

    // -- shared helpers ------------------------------------------------------

    /// Look up the job's participants. Any failure is reported as
    /// `Forbidden`, since entitlement cannot be confirmed.
    pub(crate) async fn lookup_participants(
        &self,
        job_id: JobId,
    ) -> Result<Participants, CoreError> {
        self.call(self.collaborators.jobs.participants(job_id))
            .await
            .map_err(|e| {
                tracing::warn!(job_id, error = %e, "Participant lookup failed");
                CoreError::Forbidden(format!("Cannot confirm participation in job {job_id}"))
            })
    }

    /// The room `session` has joined for `job_id`.
    pub(crate) async fn joined_room(
        &self,
        session: &Session,
        job_id: JobId,
    ) -> Result<Arc<Room>, CoreError> {
        match self.rooms.get(job_id).await {
            Some(room) if session.in_room(job_id) => Ok(room),
            _ => Err(CoreError::Forbidden(format!(
                "Join job {job_id} before sending events to it"
            ))),
        }
    }

    /// Hand `event` to the push collaborator for participants with no live
    /// connection in the room.
    pub(crate) fn notify_offline(&self, state: &RoomState, event: &ServerEvent) {
        let offline = state.offline_participants();
        if offline.is_empty() {
            return;
        }
        match serde_json::to_value(event) {
            Ok(payload) => {
                let queued = self.push.notify(state.job_id, &offline, &payload);
                tracing::debug!(job_id = state.job_id, queued, "Queued push fallback");
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode push payload"),
        }
    }

    /// Point-in-time view of a job's room for one of its participants.
    pub async fn room_snapshot(
        &self,
        job_id: JobId,
        actor_id: ActorId,
    ) -> Result<RoomSnapshot, CoreError> {
        let participants = self.lookup_participants(job_id).await?;
        if participants.role_of(actor_id).is_none() {
            return Err(CoreError::Forbidden(format!(
                "Actor {actor_id} is not a participant of job {job_id}"
            )));
        }

        if let Some(room) = self.rooms.get(job_id).await {
            let state = room.lock().await;
            if let Some(status) = state.status {
                return Ok(RoomSnapshot {
                    job_id,
                    status,
                    status_event: state.status_event.clone(),
                    online: state.online_actors(),
                    location: state.location.clone().filter(|_| status.tracks_location()),
                    location_stale: state.location_stale,
                });
            }
        }

        let snapshot = self
            .call(self.collaborators.statuses.read_status(job_id))
            .await
            .map_err(|e| persistence_failed("read_status", e))?;
        Ok(RoomSnapshot {
            job_id,
            status: snapshot.status,
            status_event: snapshot.last_event,
            online: Vec::new(),
            location: None,
            location_stale: false,
        })
    }
}

/// Map a storage failure to `PersistenceFailed`, logging the cause.
pub(crate) fn persistence_failed(operation: &str, err: CollaboratorError) -> CoreError {
    tracing::error!(operation, error = %err, "Storage collaborator failed");
    match err {
        CollaboratorError::Timeout => {
            CoreError::PersistenceFailed(format!("{operation} timed out"))
        }
        _ => CoreError::PersistenceFailed(format!("{operation} failed")),
    }
}
