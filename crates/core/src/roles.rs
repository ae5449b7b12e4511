//! Participant roles.
//!
//! The role carried in a signed claim describes who the actor is in general;
//! the role that authorizes an action on a job always comes from the job's
//! participant list (see [`crate::collaborators::Participants::role_of`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const ROLE_REQUESTER: &str = "requester";
pub const ROLE_WORKER: &str = "worker";
pub const ROLE_OBSERVER: &str = "observer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The customer who requested the job.
    Requester,
    /// The field worker assigned to the job.
    Worker,
    /// A read-only viewer (dispatcher, support staff).
    Observer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Requester => ROLE_REQUESTER,
            Role::Worker => ROLE_WORKER,
            Role::Observer => ROLE_OBSERVER,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ROLE_REQUESTER => Ok(Role::Requester),
            ROLE_WORKER => Ok(Role::Worker),
            ROLE_OBSERVER => Ok(Role::Observer),
            other => Err(CoreError::Unauthorized(format!("Unknown role '{other}'"))),
        }
    }
}
