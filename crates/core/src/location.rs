//! Location samples and the per-job coalescing window.
//!
//! [`LocationWindow`] is a trailing-edge throttle: the first sample reported
//! for an idle job opens a window; every sample that arrives before the window
//! closes replaces the pending one; closing the window yields only the newest
//! sample. The caller owns the timer and calls [`LocationWindow::close`] when
//! the configured interval has elapsed.

use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;
use crate::types::{ActorId, JobId, Timestamp};

/// Default minimum spacing between location broadcasts for one job.
pub const DEFAULT_LOCATION_MIN_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EtaEstimate {
    pub distance_meters: f64,
    pub eta_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub job_id: JobId,
    pub reporter_id: ActorId,
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at: Timestamp,
    pub eta: Option<EtaEstimate>,
}

impl LocationSample {
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Result of offering a sample to a [`LocationWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// The window was idle; the caller must schedule a close.
    Opened,
    /// A window is already open; the sample replaced the pending one.
    Coalesced,
    /// The sample was captured before one already pending or emitted.
    Outdated,
}

#[derive(Debug, Default)]
pub struct LocationWindow {
    open: bool,
    pending: Option<LocationSample>,
    last_emitted_at: Option<Timestamp>,
}

impl LocationWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn offer(&mut self, sample: LocationSample) -> Offer {
        if self
            .last_emitted_at
            .is_some_and(|emitted| sample.captured_at <= emitted)
        {
            return Offer::Outdated;
        }
        if let Some(pending) = &self.pending {
            if sample.captured_at < pending.captured_at {
                return Offer::Outdated;
            }
        }

        self.pending = Some(sample);
        if self.open {
            Offer::Coalesced
        } else {
            self.open = true;
            Offer::Opened
        }
    }

    /// Close the window and hand back the newest pending sample.
    pub fn close(&mut self) -> Option<LocationSample> {
        self.open = false;
        let sample = self.pending.take()?;
        self.last_emitted_at = Some(sample.captured_at);
        Some(sample)
    }

    /// Drop any pending sample without emitting it.
    pub fn discard(&mut self) {
        self.open = false;
        self.pending = None;
    }
}
