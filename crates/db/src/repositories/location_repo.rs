//! Repository for the `location_samples` table.

use sqlx::PgPool;
use jobline_core::location::LocationSample;
use jobline_core::types::DbId;

pub struct LocationRepo;

impl LocationRepo {
    /// Append a broadcast sample to the job's location history.
    pub async fn insert(pool: &PgPool, sample: &LocationSample) -> Result<DbId, sqlx::Error> {
        let (distance_meters, eta_seconds) = match &sample.eta {
            Some(eta) => (Some(eta.distance_meters), Some(eta.eta_seconds as i64)),
            None => (None, None),
        };
        sqlx::query_scalar(
            "INSERT INTO location_samples \
             (job_id, reporter_id, latitude, longitude, captured_at, distance_meters, eta_seconds) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id",
        )
        .bind(sample.job_id)
        .bind(sample.reporter_id)
        .bind(sample.latitude)
        .bind(sample.longitude)
        .bind(sample.captured_at)
        .bind(distance_meters)
        .bind(eta_seconds)
        .fetch_one(pool)
        .await
    }
}
