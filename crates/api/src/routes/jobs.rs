//! Route definitions for the `/jobs` resource.
//!
//! All endpoints require authentication.

use axum::routing::get;
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /{job_id}/room    -> get_room
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/{job_id}/room", get(jobs::get_room))
}
