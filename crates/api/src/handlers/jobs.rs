//! Handlers for the `/jobs` resource.

use axum::extract::{Path, State};
use axum::Json;
use jobline_core::types::JobId;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::realtime::RoomSnapshot;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/jobs/{job_id}/room
///
/// Current status, online participants and latest location of a job's room.
/// Only the job's participants may read it.
pub async fn get_room(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<Json<DataResponse<RoomSnapshot>>> {
    let snapshot = state.hub.room_snapshot(job_id, auth.actor_id).await?;
    Ok(Json(DataResponse { data: snapshot }))
}
