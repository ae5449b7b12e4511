//! Jobline domain core.
//!
//! Pure types and rules shared by the storage, push, and API crates: the job
//! status state machine, chat and location models, rate limiting, the
//! real-time wire protocol, and the interfaces of external collaborators.
//! This crate performs no I/O.

pub mod chat;
pub mod collaborators;
pub mod error;
pub mod geo;
pub mod job_status;
pub mod location;
pub mod protocol;
pub mod rate_limit;
pub mod roles;
pub mod types;
