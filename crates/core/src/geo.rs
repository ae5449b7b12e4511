//! Coordinate validation and straight-line distance/ETA.

use serde::{Deserialize, Serialize};

use crate::collaborators::{CollaboratorError, EtaEstimator};
use crate::error::CoreError;
use crate::location::EtaEstimate;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Default average travel speed (~40 km/h urban driving).
pub const DEFAULT_AVERAGE_SPEED_MPS: f64 = 11.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Validate a reported position.
pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<GeoPoint, CoreError> {
    if !latitude.is_finite() || !longitude.is_finite() {
        return Err(CoreError::InvalidEvent(
            "Coordinates must be finite numbers".into(),
        ));
    }
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(CoreError::InvalidEvent(format!(
            "Latitude must be within [-90, 90], got {latitude}"
        )));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(CoreError::InvalidEvent(format!(
            "Longitude must be within [-180, 180], got {longitude}"
        )));
    }
    Ok(GeoPoint::new(latitude, longitude))
}

/// Great-circle distance between two points in meters.
pub fn haversine_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

/// [`EtaEstimator`] that assumes a straight line at constant speed.
///
/// Used when no routing service is configured.
#[derive(Debug, Clone)]
pub struct StraightLineEstimator {
    average_speed_mps: f64,
}

impl StraightLineEstimator {
    pub fn new(average_speed_mps: f64) -> Self {
        Self { average_speed_mps }
    }
}

impl Default for StraightLineEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_AVERAGE_SPEED_MPS)
    }
}

#[async_trait::async_trait]
impl EtaEstimator for StraightLineEstimator {
    async fn estimate(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> Result<EtaEstimate, CollaboratorError> {
        if self.average_speed_mps <= 0.0 {
            return Err(CollaboratorError::Rejected(
                "average speed must be positive".into(),
            ));
        }
        let distance_meters = haversine_meters(origin, destination);
        let eta_seconds = (distance_meters / self.average_speed_mps).ceil() as u64;
        Ok(EtaEstimate {
            distance_meters,
            eta_seconds,
        })
    }
}
