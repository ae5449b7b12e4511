//! [`PgStore`]: Postgres-backed implementation of the collaborator traits.

use async_trait::async_trait;
use jobline_core::chat::ChatMessage;
use jobline_core::collaborators::{
    CollaboratorError, JobDirectory, JobStatusStore, LocationHistory, MessageStore, Participants,
    StatusSnapshot,
};
use jobline_core::geo::GeoPoint;
use jobline_core::job_status::JobStatusEvent;
use jobline_core::location::LocationSample;
use jobline_core::types::{ActorId, JobId, MessageId};

use crate::models::job::Job;
use crate::repositories::{ChatMessageRepo, JobRepo, LocationRepo};
use crate::DbPool;

/// Cloneable handle over a connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn job(&self, job_id: JobId) -> Result<Job, CollaboratorError> {
        JobRepo::find_by_id(&self.pool, job_id)
            .await
            .map_err(map_sqlx_error)?
            .ok_or_else(|| CollaboratorError::NotFound(format!("job {job_id}")))
    }
}

/// Classify a sqlx error for the real-time core.
///
/// - `RowNotFound` maps to `NotFound`.
/// - Unique violations (PostgreSQL `23505`) map to `Rejected`.
/// - Everything else maps to `Unavailable`.
fn map_sqlx_error(err: sqlx::Error) -> CollaboratorError {
    match &err {
        sqlx::Error::RowNotFound => CollaboratorError::NotFound("row not found".into()),
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
            CollaboratorError::Rejected(format!(
                "duplicate value violates {}",
                db_err.constraint().unwrap_or("unique constraint")
            ))
        }
        _ => {
            tracing::error!(error = %err, "Database error");
            CollaboratorError::Unavailable(err.to_string())
        }
    }
}

fn clamp_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl JobDirectory for PgStore {
    async fn participants(&self, job_id: JobId) -> Result<Participants, CollaboratorError> {
        let job = self.job(job_id).await?;
        let observer_ids = JobRepo::list_observers(&self.pool, job_id)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Participants {
            requester_id: job.requester_id,
            worker_id: job.worker_id,
            observer_ids,
        })
    }

    async fn destination(&self, job_id: JobId) -> Result<Option<GeoPoint>, CollaboratorError> {
        Ok(self.job(job_id).await?.destination())
    }
}

#[async_trait]
impl JobStatusStore for PgStore {
    async fn read_status(&self, job_id: JobId) -> Result<StatusSnapshot, CollaboratorError> {
        let job = self.job(job_id).await?;
        let status = job
            .status()
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;
        let last_event = JobRepo::latest_status_event(&self.pool, job_id)
            .await
            .map_err(map_sqlx_error)?
            .map(JobStatusEvent::try_from)
            .transpose()
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;
        Ok(StatusSnapshot { status, last_event })
    }

    async fn write_status(
        &self,
        job_id: JobId,
        event: &JobStatusEvent,
    ) -> Result<(), CollaboratorError> {
        let applied = JobRepo::apply_transition(&self.pool, job_id, event)
            .await
            .map_err(map_sqlx_error)?;
        if applied {
            Ok(())
        } else {
            Err(CollaboratorError::Rejected(format!(
                "job {job_id} is no longer in status {}",
                event.from_status
            )))
        }
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn append(&self, message: &ChatMessage) -> Result<MessageId, CollaboratorError> {
        ChatMessageRepo::insert(&self.pool, message)
            .await
            .map_err(map_sqlx_error)
    }

    async fn query_after(
        &self,
        job_id: JobId,
        cursor: MessageId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, CollaboratorError> {
        let rows = ChatMessageRepo::list_after(&self.pool, job_id, cursor, clamp_limit(limit))
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(ChatMessage::from).collect())
    }

    async fn query_latest(
        &self,
        job_id: JobId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, CollaboratorError> {
        let rows = ChatMessageRepo::list_latest(&self.pool, job_id, clamp_limit(limit))
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(ChatMessage::from).collect())
    }

    async fn latest_id(&self, job_id: JobId) -> Result<MessageId, CollaboratorError> {
        ChatMessageRepo::max_id(&self.pool, job_id)
            .await
            .map_err(map_sqlx_error)
    }

    async fn mark_read(
        &self,
        job_id: JobId,
        message_id: MessageId,
        reader_id: ActorId,
    ) -> Result<bool, CollaboratorError> {
        ChatMessageRepo::mark_read(&self.pool, job_id, message_id, reader_id)
            .await
            .map_err(map_sqlx_error)
    }

    async fn mark_delivered(
        &self,
        job_id: JobId,
        message_id: MessageId,
    ) -> Result<bool, CollaboratorError> {
        ChatMessageRepo::mark_delivered(&self.pool, job_id, message_id)
            .await
            .map_err(map_sqlx_error)
    }
}

#[async_trait]
impl LocationHistory for PgStore {
    async fn record(&self, sample: &LocationSample) -> Result<(), CollaboratorError> {
        LocationRepo::insert(&self.pool, sample)
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }
}
