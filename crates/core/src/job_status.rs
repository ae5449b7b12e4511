//! Job status state machine.
//!
//! Defines the job lifecycle statuses, the adjacency table of legal
//! transitions, and which participant role may perform each one. The initial
//! `REQUESTED` status is written by the job-creation service; this module only
//! governs what happens after a job has a room.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::roles::Role;
use crate::types::{ActorId, JobId, Timestamp};

/// Maximum length of the free-form notes attached to a transition.
pub const MAX_NOTES_LENGTH: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Requested,
    Accepted,
    EnRoute,
    InProgress,
    Completed,
    Cancelled,
}

/// All statuses, in lifecycle order.
pub const ALL_STATUSES: &[JobStatus] = &[
    JobStatus::Requested,
    JobStatus::Accepted,
    JobStatus::EnRoute,
    JobStatus::InProgress,
    JobStatus::Completed,
    JobStatus::Cancelled,
];

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Requested => "REQUESTED",
            JobStatus::Accepted => "ACCEPTED",
            JobStatus::EnRoute => "EN_ROUTE",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    /// `COMPLETED` and `CANCELLED` have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }

    /// Whether the worker's live position is meaningful in this status.
    pub fn tracks_location(&self) -> bool {
        matches!(
            self,
            JobStatus::Accepted | JobStatus::EnRoute | JobStatus::InProgress
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_STATUSES
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::InvalidEvent(format!("Unknown job status '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Returns the statuses that `from` may move to.
///
/// - `REQUESTED`   -> `ACCEPTED`, `CANCELLED`
/// - `ACCEPTED`    -> `EN_ROUTE`, `CANCELLED`
/// - `EN_ROUTE`    -> `IN_PROGRESS`, `CANCELLED`
/// - `IN_PROGRESS` -> `COMPLETED`, `CANCELLED`
/// - terminal      -> nothing
pub fn valid_transitions(from: JobStatus) -> &'static [JobStatus] {
    match from {
        JobStatus::Requested => &[JobStatus::Accepted, JobStatus::Cancelled],
        JobStatus::Accepted => &[JobStatus::EnRoute, JobStatus::Cancelled],
        JobStatus::EnRoute => &[JobStatus::InProgress, JobStatus::Cancelled],
        JobStatus::InProgress => &[JobStatus::Completed, JobStatus::Cancelled],
        JobStatus::Completed | JobStatus::Cancelled => &[],
    }
}

/// Roles allowed to move a job into `to`.
pub fn roles_for_target(to: JobStatus) -> &'static [Role] {
    match to {
        JobStatus::Cancelled => &[Role::Requester, Role::Worker],
        JobStatus::Accepted | JobStatus::EnRoute | JobStatus::InProgress | JobStatus::Completed => {
            &[Role::Worker]
        }
        JobStatus::Requested => &[],
    }
}

/// Validate a transition requested by a participant holding `role` on the job.
///
/// Both a non-adjacent target and a role that may not perform the move are
/// reported as [`CoreError::InvalidTransition`].
pub fn authorize_transition(from: JobStatus, to: JobStatus, role: Role) -> Result<(), CoreError> {
    let allowed = valid_transitions(from);
    if !allowed.contains(&to) {
        return Err(CoreError::InvalidTransition(format!(
            "Cannot transition job from '{from}' to '{to}'. Allowed transitions: {allowed:?}"
        )));
    }
    if !roles_for_target(to).contains(&role) {
        return Err(CoreError::InvalidTransition(format!(
            "Role '{role}' may not move a job to '{to}'"
        )));
    }
    Ok(())
}

/// Validate the optional notes attached to a transition.
pub fn validate_notes(notes: Option<&str>) -> Result<(), CoreError> {
    match notes {
        Some(n) if n.chars().count() > MAX_NOTES_LENGTH => Err(CoreError::InvalidEvent(format!(
            "Notes exceed maximum length of {MAX_NOTES_LENGTH} characters"
        ))),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// JobStatusEvent
// ---------------------------------------------------------------------------

/// A single applied status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusEvent {
    pub job_id: JobId,
    pub from_status: JobStatus,
    pub to_status: JobStatus,
    pub actor_id: ActorId,
    pub notes: Option<String>,
    pub timestamp: Timestamp,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
