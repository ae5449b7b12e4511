//! Bearer-token authentication extractor for Axum handlers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jobline_core::error::CoreError;
use jobline_core::roles::Role;
use jobline_core::types::ActorId;

use crate::error::AppError;
use crate::state::AppState;

/// Authenticated actor extracted from a Bearer token in the `Authorization`
/// header.
///
/// The token is checked by the same identity collaborator that verifies the
/// WebSocket handshake.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub actor_id: ActorId,
    pub role: Role,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Core(CoreError::Unauthorized(
                    "Missing Authorization header".into(),
                ))
            })?;

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            AppError::Core(CoreError::Unauthorized(
                "Invalid Authorization format. Expected: Bearer <token>".into(),
            ))
        })?;

        let claim = state.hub.verify_claim(token).await?;

        Ok(AuthUser {
            actor_id: claim.actor_id,
            role: claim.role,
        })
    }
}
