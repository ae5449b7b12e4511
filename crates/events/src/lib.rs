//! Notification fallback for participants who are not connected.
//!
//! - [`PushFallback`]: bounded in-process queue drained by a background
//!   worker that hands each notification to a [`PushDispatcher`].
//! - [`delivery`]: concrete dispatchers (webhook, tracing-only).
//!
//! [`PushDispatcher`]: jobline_core::collaborators::PushDispatcher

pub mod delivery;
pub mod push;

pub use delivery::log::TracingPushDispatcher;
pub use delivery::webhook::{WebhookError, WebhookPushDispatcher};
pub use push::{PushFallback, PushNotification};
