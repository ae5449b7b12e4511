use crate::protocol::ErrorCode;

/// Domain error taxonomy for the real-time job room.
///
/// Every variant maps onto exactly one wire [`ErrorCode`] so a rejected event
/// can always be reported back to the originating session.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    /// Bad or expired claim. The connection is closed.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated, but not entitled to the room or action.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Frame or field failed schema/value validation.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Status change rejected by the job state machine.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Sender exceeded its per-kind rate limit.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// A storage collaborator write/read failed or timed out.
    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),
}

impl CoreError {
    /// Wire code reported in `error{code, message}`.
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::Unauthorized(_) => ErrorCode::Unauthorized,
            CoreError::Forbidden(_) => ErrorCode::Forbidden,
            CoreError::InvalidEvent(_) => ErrorCode::InvalidEvent,
            CoreError::InvalidTransition(_) => ErrorCode::InvalidTransition,
            CoreError::RateLimited(_) => ErrorCode::RateLimited,
            CoreError::PersistenceFailed(_) => ErrorCode::PersistenceFailed,
        }
    }

    /// Human-readable detail without the variant prefix.
    pub fn detail(&self) -> &str {
        match self {
            CoreError::Unauthorized(m)
            | CoreError::Forbidden(m)
            | CoreError::InvalidEvent(m)
            | CoreError::InvalidTransition(m)
            | CoreError::RateLimited(m)
            | CoreError::PersistenceFailed(m) => m,
        }
    }

    /// Whether the error terminates the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Unauthorized(_))
    }
}
