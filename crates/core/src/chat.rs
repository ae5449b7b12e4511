//! Chat message model, validation, and the per-room recent-message cache.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{ActorId, JobId, MessageId, Timestamp};

/// Maximum length of a chat message body (characters, after trimming).
pub const MAX_BODY_LENGTH: usize = 4_000;

/// Maximum length of an attachment reference (an opaque media key/URL).
pub const MAX_ATTACHMENT_REF_LENGTH: usize = 512;

/// Default number of messages kept in a room for fast resync.
pub const DEFAULT_ROOM_MESSAGE_CACHE: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub job_id: JobId,
    pub sender_id: ActorId,
    pub body: String,
    pub attachment_ref: Option<String>,
    pub created_at: Timestamp,
    pub delivered: bool,
    pub read: bool,
}

/// Validate and normalize a message body. Returns the trimmed body.
pub fn validate_body(body: &str) -> Result<String, CoreError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidEvent("Message body must not be empty".into()));
    }
    let len = trimmed.chars().count();
    if len > MAX_BODY_LENGTH {
        return Err(CoreError::InvalidEvent(format!(
            "Message body exceeds maximum length of {MAX_BODY_LENGTH} characters (got {len})"
        )));
    }
    Ok(trimmed.to_string())
}

pub fn validate_attachment_ref(attachment_ref: Option<&str>) -> Result<(), CoreError> {
    match attachment_ref {
        Some(r) if r.trim().is_empty() => Err(CoreError::InvalidEvent(
            "attachment_ref must not be blank".into(),
        )),
        Some(r) if r.len() > MAX_ATTACHMENT_REF_LENGTH => Err(CoreError::InvalidEvent(format!(
            "attachment_ref exceeds {MAX_ATTACHMENT_REF_LENGTH} bytes"
        ))),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// MessageCache
// ---------------------------------------------------------------------------

/// Bounded cache of the most recent messages of one job.
///
/// `floor` is the highest id known *not* to be cached: every message with an
/// id above `floor` is in the cache. A query can be answered from memory only
/// when it starts at or above the floor.
#[derive(Debug)]
pub struct MessageCache {
    capacity: usize,
    floor: MessageId,
    messages: VecDeque<ChatMessage>,
}

/// Messages answered from the cache, plus whether more exist past the limit.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRange {
    pub messages: Vec<ChatMessage>,
    pub has_more: bool,
}

impl MessageCache {
    /// Create an empty cache for a job whose stored history ends at `floor`.
    pub fn new(capacity: usize, floor: MessageId) -> Self {
        Self {
            capacity: capacity.max(1),
            floor,
            messages: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Highest id known to be stored but not cached.
    pub fn floor(&self) -> MessageId {
        self.floor
    }

    pub fn last_id(&self) -> MessageId {
        self.messages.back().map(|m| m.id).unwrap_or(self.floor)
    }

    /// Append a newly persisted message, evicting the oldest when full.
    pub fn push(&mut self, message: ChatMessage) {
        if self.messages.len() == self.capacity {
            if let Some(evicted) = self.messages.pop_front() {
                self.floor = evicted.id;
            }
        }
        self.messages.push_back(message);
    }

    /// Messages with id greater than `cursor`, oldest first, at most `limit`.
    ///
    /// Returns `None` when the range starts below what the cache holds.
    pub fn after(&self, cursor: MessageId, limit: usize) -> Option<CachedRange> {
        if cursor < self.floor {
            return None;
        }
        let mut newer = self.messages.iter().filter(|m| m.id > cursor);
        let messages: Vec<ChatMessage> = newer.by_ref().take(limit).cloned().collect();
        let has_more = newer.next().is_some();
        Some(CachedRange { messages, has_more })
    }

    /// The newest `limit` messages, oldest first.
    ///
    /// Returns `None` when older messages exist in storage that the window
    /// would need.
    pub fn latest(&self, limit: usize) -> Option<Vec<ChatMessage>> {
        if self.messages.len() < limit && self.floor > 0 {
            return None;
        }
        let skip = self.messages.len().saturating_sub(limit);
        Some(self.messages.iter().skip(skip).cloned().collect())
    }

    pub fn get(&self, id: MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Flag a cached message as read, which implies delivered. Returns
    /// `false` if it is not cached.
    pub fn mark_read(&mut self, id: MessageId) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(m) => {
                m.read = true;
                m.delivered = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_delivered(&mut self, id: MessageId) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(m) => {
                m.delivered = true;
                true
            }
            None => false,
        }
    }
}
