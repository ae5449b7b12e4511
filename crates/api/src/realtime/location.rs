//! Worker position ingestion, ETA annotation and throttled fan-out.
//!
//! Reports go into the room's trailing-edge [`LocationWindow`]. The first
//! report for an idle job schedules a flush `location_min_interval` later;
//! the flush annotates the newest pending sample with an ETA and broadcasts
//! it once.
//!
//! [`LocationWindow`]: jobline_core::location::LocationWindow

use std::sync::Arc;

use chrono::{Duration, Utc};
use jobline_core::error::CoreError;
use jobline_core::geo::{validate_coordinates, GeoPoint};
use jobline_core::location::{EtaEstimate, LocationSample, Offer};
use jobline_core::protocol::ServerEvent;
use jobline_core::types::{JobId, Timestamp};

use super::room::Room;
use super::session::Session;
use super::RealtimeHub;

/// Reports stamped further ahead of the server clock are rejected.
const MAX_CLOCK_SKEW_SECS: i64 = 60;

impl RealtimeHub {
    pub(crate) async fn report_location(
        self: &Arc<Self>,
        session: &Arc<Session>,
        job_id: JobId,
        lat: f64,
        lng: f64,
        captured_at: Timestamp,
    ) -> Result<(), CoreError> {
        let point = validate_coordinates(lat, lng)?;
        if captured_at > Utc::now() + Duration::seconds(MAX_CLOCK_SKEW_SECS) {
            return Err(CoreError::InvalidEvent(
                "captured_at is in the future".into(),
            ));
        }

        let room = self.joined_room(session, job_id).await?;
        let mut state = room.lock().await;
        state.require_member(session)?;
        if !state.is_worker(session.actor_id) {
            return Err(CoreError::Forbidden(format!(
                "Only the worker of job {job_id} may report location"
            )));
        }
        let status = state.status()?;
        if !status.tracks_location() {
            return Err(CoreError::InvalidEvent(format!(
                "Location is not tracked while job {job_id} is {status}"
            )));
        }

        let sample = LocationSample {
            job_id,
            reporter_id: session.actor_id,
            latitude: point.latitude,
            longitude: point.longitude,
            captured_at,
            eta: None,
        };
        match state.location_window.offer(sample) {
            Offer::Opened => {
                let hub = Arc::clone(self);
                let flush_room = Arc::clone(&room);
                let interval = self.config.location_min_interval;
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(interval).await;
                    hub.flush_location(&flush_room).await;
                });
                state.location_flush = Some(handle.abort_handle());
            }
            Offer::Coalesced => {}
            Offer::Outdated => {
                tracing::debug!(job_id, %captured_at, "Dropped out-of-order location sample");
            }
        }
        Ok(())
    }

    /// Close the room's location window and broadcast its newest sample.
    async fn flush_location(&self, room: &Arc<Room>) {
        let (mut sample, cached_destination) = {
            let mut state = room.lock().await;
            state.location_flush = None;
            let Some(sample) = state.location_window.close() else {
                return;
            };
            (sample, state.destination)
        };

        // Collaborator calls run outside the room lock.
        let destination = match cached_destination {
            Some(destination) => destination,
            None => match self
                .call(self.collaborators.jobs.destination(room.job_id))
                .await
            {
                Ok(destination) => {
                    room.lock().await.destination = Some(destination);
                    destination
                }
                Err(e) => {
                    tracing::warn!(job_id = room.job_id, error = %e, "Destination lookup failed");
                    None
                }
            },
        };
        if let Some(destination) = destination {
            sample.eta = self.estimate(room.job_id, sample.position(), destination).await;
        }

        let mut state = room.lock().await;
        if room.is_removed() || !state.status.is_some_and(|s| s.tracks_location()) {
            return;
        }
        if state
            .location
            .as_ref()
            .is_some_and(|latest| latest.captured_at >= sample.captured_at)
        {
            return;
        }

        state.location = Some(sample.clone());
        state.location_stale = false;
        let reporter = state
            .live_members()
            .into_iter()
            .find(|s| s.actor_id == sample.reporter_id)
            .map(|s| s.conn_id);
        let delivered = state.broadcast(
            &ServerEvent::LocationUpdated {
                sample: sample.clone(),
            },
            reporter,
        );
        drop(state);
        tracing::debug!(job_id = room.job_id, delivered, "Location broadcast");

        self.record_history(sample);
    }

    /// Distance and ETA, or `None` if the estimator fails.
    async fn estimate(
        &self,
        job_id: JobId,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> Option<EtaEstimate> {
        match self
            .call(self.collaborators.eta.estimate(origin, destination))
            .await
        {
            Ok(eta) => Some(eta),
            Err(e) => {
                tracing::warn!(job_id, error = %e, "ETA estimate failed");
                None
            }
        }
    }

    /// Append a broadcast sample to location history, best effort.
    fn record_history(&self, sample: LocationSample) {
        let Some(history) = self.collaborators.location_history.clone() else {
            return;
        };
        let timeout = self.config.collaborator_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, history.record(&sample)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(job_id = sample.job_id, error = %e, "Failed to record location")
                }
                Err(_) => tracing::warn!(job_id = sample.job_id, "Recording location timed out"),
            }
        });
    }
}
