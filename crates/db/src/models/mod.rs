//! Row types for the real-time tables.

pub mod chat_message;
pub mod job;
