//! Real-time wire protocol.
//!
//! Every frame is a JSON object with an internally-tagged `"type"`
//! discriminator. Inbound frames form the closed set [`ClientEvent`]; anything
//! that does not parse into one of its variants is an
//! [`CoreError::InvalidEvent`].

use serde::{Deserialize, Serialize};

use crate::chat::ChatMessage;
use crate::error::CoreError;
use crate::job_status::{JobStatus, JobStatusEvent};
use crate::location::LocationSample;
use crate::rate_limit::EventKind;
use crate::roles::Role;
use crate::types::{ActorId, JobId, MessageId, Timestamp};

/// Largest inbound text frame accepted, in bytes.
pub const MAX_FRAME_BYTES: usize = 16 * 1024;

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// First frame on every connection.
    #[serde(rename = "session.authenticate")]
    Authenticate { claim: String },

    #[serde(rename = "room.join")]
    RoomJoin {
        job_id: JobId,
        #[serde(default)]
        last_seen_message_id: Option<MessageId>,
    },

    #[serde(rename = "room.leave")]
    RoomLeave { job_id: JobId },

    #[serde(rename = "status.transition")]
    StatusTransition {
        job_id: JobId,
        target_status: JobStatus,
        #[serde(default)]
        notes: Option<String>,
    },

    #[serde(rename = "location.report")]
    LocationReport {
        job_id: JobId,
        lat: f64,
        lng: f64,
        captured_at: Timestamp,
    },

    #[serde(rename = "chat.send")]
    ChatSend {
        job_id: JobId,
        body: String,
        #[serde(default)]
        attachment_ref: Option<String>,
    },

    #[serde(rename = "chat.typing")]
    ChatTyping { job_id: JobId, is_typing: bool },

    #[serde(rename = "chat.read")]
    ChatRead { job_id: JobId, message_id: MessageId },
}

impl ClientEvent {
    /// Wire name of the event, as it appears in the `type` field.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Authenticate { .. } => "session.authenticate",
            ClientEvent::RoomJoin { .. } => "room.join",
            ClientEvent::RoomLeave { .. } => "room.leave",
            ClientEvent::StatusTransition { .. } => "status.transition",
            ClientEvent::LocationReport { .. } => "location.report",
            ClientEvent::ChatSend { .. } => "chat.send",
            ClientEvent::ChatTyping { .. } => "chat.typing",
            ClientEvent::ChatRead { .. } => "chat.read",
        }
    }

    /// Rate-limit class. `None` for the handshake, which is never limited.
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            ClientEvent::Authenticate { .. } => None,
            ClientEvent::RoomJoin { .. } | ClientEvent::RoomLeave { .. } => Some(EventKind::Room),
            ClientEvent::StatusTransition { .. } => Some(EventKind::Status),
            ClientEvent::LocationReport { .. } => Some(EventKind::Location),
            ClientEvent::ChatSend { .. }
            | ClientEvent::ChatTyping { .. }
            | ClientEvent::ChatRead { .. } => Some(EventKind::Chat),
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        match self {
            ClientEvent::Authenticate { .. } => None,
            ClientEvent::RoomJoin { job_id, .. }
            | ClientEvent::RoomLeave { job_id }
            | ClientEvent::StatusTransition { job_id, .. }
            | ClientEvent::LocationReport { job_id, .. }
            | ClientEvent::ChatSend { job_id, .. }
            | ClientEvent::ChatTyping { job_id, .. }
            | ClientEvent::ChatRead { job_id, .. } => Some(*job_id),
        }
    }
}

/// Parse one inbound text frame.
pub fn parse_client_event(raw: &str) -> Result<ClientEvent, CoreError> {
    if raw.len() > MAX_FRAME_BYTES {
        return Err(CoreError::InvalidEvent(format!(
            "Frame exceeds {MAX_FRAME_BYTES} bytes"
        )));
    }
    serde_json::from_str(raw).map_err(|e| CoreError::InvalidEvent(e.to_string()))
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    InvalidEvent,
    InvalidTransition,
    RateLimited,
    PersistenceFailed,
}

/// Snapshot delivered to a (re)joining session only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResyncPayload {
    pub job_id: JobId,
    pub status: JobStatus,
    pub status_event: Option<JobStatusEvent>,
    pub location: Option<LocationSample>,
    pub location_stale: bool,
    pub messages: Vec<ChatMessage>,
    /// More messages exist past the returned window.
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.ready")]
    SessionReady {
        actor_id: ActorId,
        role: Role,
        expires_at: Timestamp,
    },

    #[serde(rename = "room.joined")]
    RoomJoined { resync: ResyncPayload },

    #[serde(rename = "room.left")]
    RoomLeft { job_id: JobId },

    /// Confirms an accepted event to its sender.
    #[serde(rename = "ack")]
    Ack {
        job_id: JobId,
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
    },

    #[serde(rename = "status.updated")]
    StatusUpdated { event: JobStatusEvent },

    #[serde(rename = "location.updated")]
    LocationUpdated { sample: LocationSample },

    /// The worker's last connection dropped; the latest sample is aging.
    #[serde(rename = "location.stale")]
    LocationStale { job_id: JobId },

    #[serde(rename = "chat.new")]
    ChatNew { message: ChatMessage },

    #[serde(rename = "chat.typing-indicator")]
    TypingIndicator {
        job_id: JobId,
        sender_id: ActorId,
        is_typing: bool,
    },

    #[serde(rename = "chat.read-receipt")]
    ReadReceipt {
        job_id: JobId,
        message_id: MessageId,
        reader_id: ActorId,
    },

    #[serde(rename = "error")]
    Error { code: ErrorCode, message: String },
}

impl ServerEvent {
    pub fn error(err: &CoreError) -> Self {
        ServerEvent::Error {
            code: err.code(),
            message: err.detail().to_string(),
        }
    }

    /// Acknowledge the inbound event named `event`.
    pub fn ack(job_id: JobId, event: &str) -> Self {
        ServerEvent::Ack {
            job_id,
            event: event.to_string(),
            message_id: None,
        }
    }

    /// Acknowledge a `chat.send` with the id the message was stored under.
    pub fn message_ack(job_id: JobId, message_id: MessageId) -> Self {
        ServerEvent::Ack {
            job_id,
            event: "chat.send".to_string(),
            message_id: Some(message_id),
        }
    }
}
