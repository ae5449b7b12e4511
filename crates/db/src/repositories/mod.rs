//! Repositories for the real-time tables.

mod chat_message_repo;
mod job_repo;
mod location_repo;

pub use chat_message_repo::ChatMessageRepo;
pub use job_repo::JobRepo;
pub use location_repo::LocationRepo;
