//! Interfaces to the services this core consumes but does not own.
//!
//! Identity, job lookup/persistence, distance estimation, message storage and
//! push delivery are conventional request/response services. They are held as
//! `Arc<dyn Trait>` so the server can run against Postgres/HTTP
//! implementations and tests against in-memory ones.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chat::ChatMessage;
use crate::geo::GeoPoint;
use crate::job_status::{JobStatus, JobStatusEvent};
use crate::location::{EtaEstimate, LocationSample};
use crate::roles::Role;
use crate::types::{ActorId, JobId, MessageId, Timestamp};

/// Failure reported by (or on behalf of) an external collaborator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("collaborator call timed out")]
    Timeout,

    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Verified contents of a signed claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedClaim {
    pub actor_id: ActorId,
    pub role: Role,
    pub expires_at: Timestamp,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify signature and expiry of `token`.
    async fn verify_claim(&self, token: &str) -> Result<VerifiedClaim, CollaboratorError>;
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Everyone entitled to a job's room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participants {
    pub requester_id: ActorId,
    pub worker_id: Option<ActorId>,
    pub observer_ids: Vec<ActorId>,
}

impl Participants {
    /// The role `actor_id` holds on this job, if any.
    ///
    /// An actor listed twice resolves to the most privileged role.
    pub fn role_of(&self, actor_id: ActorId) -> Option<Role> {
        if self.worker_id == Some(actor_id) {
            Some(Role::Worker)
        } else if self.requester_id == actor_id {
            Some(Role::Requester)
        } else if self.observer_ids.contains(&actor_id) {
            Some(Role::Observer)
        } else {
            None
        }
    }

    pub fn all(&self) -> Vec<ActorId> {
        let mut ids = vec![self.requester_id];
        ids.extend(self.worker_id);
        ids.extend(self.observer_ids.iter().copied());
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

#[async_trait]
pub trait JobDirectory: Send + Sync {
    async fn participants(&self, job_id: JobId) -> Result<Participants, CollaboratorError>;

    /// Where the worker is heading. `None` if the job has no fixed site.
    async fn destination(&self, job_id: JobId) -> Result<Option<GeoPoint>, CollaboratorError>;
}

/// Current status plus the event that produced it (absent for a job that is
/// still in its initial status).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: JobStatus,
    pub last_event: Option<JobStatusEvent>,
}

#[async_trait]
pub trait JobStatusStore: Send + Sync {
    async fn read_status(&self, job_id: JobId) -> Result<StatusSnapshot, CollaboratorError>;

    /// Persist an applied transition. Implementations should reject the write
    /// if the stored status no longer equals `event.from_status`.
    async fn write_status(
        &self,
        job_id: JobId,
        event: &JobStatusEvent,
    ) -> Result<(), CollaboratorError>;
}

// ---------------------------------------------------------------------------
// Distance / ETA
// ---------------------------------------------------------------------------

#[async_trait]
pub trait EtaEstimator: Send + Sync {
    async fn estimate(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> Result<EtaEstimate, CollaboratorError>;
}

// ---------------------------------------------------------------------------
// Message storage
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Durably record a message whose id was assigned by the caller.
    async fn append(&self, message: &ChatMessage) -> Result<MessageId, CollaboratorError>;

    /// Messages with id greater than `cursor`, ascending, at most `limit`.
    async fn query_after(
        &self,
        job_id: JobId,
        cursor: MessageId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, CollaboratorError>;

    /// The newest `limit` messages, ascending.
    async fn query_latest(
        &self,
        job_id: JobId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, CollaboratorError>;

    /// Highest stored id for the job, `0` when there are none.
    async fn latest_id(&self, job_id: JobId) -> Result<MessageId, CollaboratorError>;

    /// Flag a message from someone other than `reader_id` as read and
    /// delivered. Returns `false` if no such message exists.
    async fn mark_read(
        &self,
        job_id: JobId,
        message_id: MessageId,
        reader_id: ActorId,
    ) -> Result<bool, CollaboratorError>;

    async fn mark_delivered(
        &self,
        job_id: JobId,
        message_id: MessageId,
    ) -> Result<bool, CollaboratorError>;
}

/// Optional durable history of broadcast location samples.
#[async_trait]
pub trait LocationHistory: Send + Sync {
    async fn record(&self, sample: &LocationSample) -> Result<(), CollaboratorError>;
}

// ---------------------------------------------------------------------------
// Push notifications
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PushDispatcher: Send + Sync {
    async fn enqueue(
        &self,
        actor_id: ActorId,
        payload: &serde_json::Value,
    ) -> Result<(), CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participants() -> Participants {
        Participants {
            requester_id: 1,
            worker_id: Some(2),
            observer_ids: vec![3, 1],
        }
    }

    #[test]
    fn role_of_resolves_each_participant() {
        let p = participants();
        assert_eq!(p.role_of(1), Some(Role::Requester));
        assert_eq!(p.role_of(2), Some(Role::Worker));
        assert_eq!(p.role_of(3), Some(Role::Observer));
        assert_eq!(p.role_of(99), None);
    }

    #[test]
    fn all_is_deduplicated() {
        assert_eq!(participants().all(), vec![1, 2, 3]);
    }

    #[test]
    fn unassigned_job_has_no_worker() {
        let p = Participants {
            requester_id: 1,
            worker_id: None,
            observer_ids: vec![],
        };
        assert_eq!(p.role_of(2), None);
        assert_eq!(p.all(), vec![1]);
    }
}
