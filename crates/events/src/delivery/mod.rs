//! Push delivery channels used by the fallback worker.

pub mod log;
pub mod webhook;
