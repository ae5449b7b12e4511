//! Repository for the `jobs`, `job_observers`, and `job_status_events` tables.

use sqlx::PgPool;
use jobline_core::job_status::JobStatusEvent;
use jobline_core::types::DbId;

use crate::models::job::{Job, JobStatusEventRow};

/// Column list for `jobs` queries.
const COLUMNS: &str = "id, requester_id, worker_id, status, destination_lat, destination_lng";

/// Column list for `job_status_events` queries.
const EVENT_COLUMNS: &str = "id, job_id, from_status, to_status, actor_id, notes, created_at";

pub struct JobRepo;

impl JobRepo {
    /// Find a job by id.
    pub async fn find_by_id(pool: &PgPool, job_id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .fetch_optional(pool)
            .await
    }

    /// Actor ids authorized to observe a job.
    pub async fn list_observers(pool: &PgPool, job_id: DbId) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT observer_id FROM job_observers WHERE job_id = $1 ORDER BY observer_id",
        )
        .bind(job_id)
        .fetch_all(pool)
        .await
    }

    /// The most recent status event for a job, if any.
    pub async fn latest_status_event(
        pool: &PgPool,
        job_id: DbId,
    ) -> Result<Option<JobStatusEventRow>, sqlx::Error> {
        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM job_status_events \
             WHERE job_id = $1 ORDER BY id DESC LIMIT 1"
        );
        sqlx::query_as::<_, JobStatusEventRow>(&query)
            .bind(job_id)
            .fetch_optional(pool)
            .await
    }

    /// Advance a job's status and record the event in one transaction.
    ///
    /// The update is conditional on the stored status still being
    /// `event.from_status`. Returns `false` (and writes nothing) otherwise.
    pub async fn apply_transition(
        pool: &PgPool,
        job_id: DbId,
        event: &JobStatusEvent,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE jobs SET status = $1, updated_at = NOW() \
             WHERE id = $2 AND status = $3",
        )
        .bind(event.to_status.as_str())
        .bind(job_id)
        .bind(event.from_status.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO job_status_events \
             (job_id, from_status, to_status, actor_id, notes, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(job_id)
        .bind(event.from_status.as_str())
        .bind(event.to_status.as_str())
        .bind(event.actor_id)
        .bind(event.notes.as_deref())
        .bind(event.timestamp)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }
}
