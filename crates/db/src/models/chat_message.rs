//! Chat message rows.

use sqlx::FromRow;
use jobline_core::chat::ChatMessage;
use jobline_core::types::{DbId, MessageId, Timestamp};

/// A row from the `chat_messages` table.
#[derive(Debug, Clone, FromRow)]
pub struct ChatMessageRow {
    pub job_id: DbId,
    pub id: MessageId,
    pub sender_id: DbId,
    pub body: String,
    pub attachment_ref: Option<String>,
    pub created_at: Timestamp,
    pub is_delivered: bool,
    pub is_read: bool,
}

impl From<ChatMessageRow> for ChatMessage {
    fn from(row: ChatMessageRow) -> Self {
        ChatMessage {
            id: row.id,
            job_id: row.job_id,
            sender_id: row.sender_id,
            body: row.body,
            attachment_ref: row.attachment_ref,
            created_at: row.created_at,
            delivered: row.is_delivered,
            read: row.is_read,
        }
    }
}
