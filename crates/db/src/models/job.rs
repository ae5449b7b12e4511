//! Job and status-event rows.

use sqlx::FromRow;
use jobline_core::error::CoreError;
use jobline_core::geo::GeoPoint;
use jobline_core::job_status::{JobStatus, JobStatusEvent};
use jobline_core::types::{DbId, Timestamp};

/// A row from the `jobs` table (only the columns this service reads).
#[derive(Debug, Clone, FromRow)]
pub struct Job {
    pub id: DbId,
    pub requester_id: DbId,
    pub worker_id: Option<DbId>,
    pub status: String,
    pub destination_lat: Option<f64>,
    pub destination_lng: Option<f64>,
}

impl Job {
    pub fn status(&self) -> Result<JobStatus, CoreError> {
        self.status.parse()
    }

    /// Both coordinates must be present for the job to have a destination.
    pub fn destination(&self) -> Option<GeoPoint> {
        match (self.destination_lat, self.destination_lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
            _ => None,
        }
    }
}

/// A row from the `job_status_events` table.
#[derive(Debug, Clone, FromRow)]
pub struct JobStatusEventRow {
    pub id: DbId,
    pub job_id: DbId,
    pub from_status: String,
    pub to_status: String,
    pub actor_id: DbId,
    pub notes: Option<String>,
    pub created_at: Timestamp,
}

impl TryFrom<JobStatusEventRow> for JobStatusEvent {
    type Error = CoreError;

    fn try_from(row: JobStatusEventRow) -> Result<Self, Self::Error> {
        Ok(JobStatusEvent {
            job_id: row.job_id,
            from_status: row.from_status.parse()?,
            to_status: row.to_status.parse()?,
            actor_id: row.actor_id,
            notes: row.notes,
            timestamp: row.created_at,
        })
    }
}
