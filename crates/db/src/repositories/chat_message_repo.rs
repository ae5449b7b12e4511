//! Repository for the `chat_messages` table.

use sqlx::PgPool;
use jobline_core::chat::ChatMessage;
use jobline_core::types::{DbId, MessageId};

use crate::models::chat_message::ChatMessageRow;

/// Column list for `chat_messages` queries.
const COLUMNS: &str =
    "job_id, id, sender_id, body, attachment_ref, created_at, is_delivered, is_read";

pub struct ChatMessageRepo;

impl ChatMessageRepo {
    /// Insert a message with its server-assigned id, returning that id.
    pub async fn insert(pool: &PgPool, message: &ChatMessage) -> Result<MessageId, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO chat_messages \
             (job_id, id, sender_id, body, attachment_ref, created_at, is_delivered, is_read) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id",
        )
        .bind(message.job_id)
        .bind(message.id)
        .bind(message.sender_id)
        .bind(&message.body)
        .bind(message.attachment_ref.as_deref())
        .bind(message.created_at)
        .bind(message.delivered)
        .bind(message.read)
        .fetch_one(pool)
        .await
    }

    /// Messages newer than `cursor`, oldest first.
    pub async fn list_after(
        pool: &PgPool,
        job_id: DbId,
        cursor: MessageId,
        limit: i64,
    ) -> Result<Vec<ChatMessageRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM chat_messages \
             WHERE job_id = $1 AND id > $2 \
             ORDER BY id ASC LIMIT $3"
        );
        sqlx::query_as::<_, ChatMessageRow>(&query)
            .bind(job_id)
            .bind(cursor)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// The newest `limit` messages, oldest first.
    pub async fn list_latest(
        pool: &PgPool,
        job_id: DbId,
        limit: i64,
    ) -> Result<Vec<ChatMessageRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM ( \
                 SELECT {COLUMNS} FROM chat_messages \
                 WHERE job_id = $1 ORDER BY id DESC LIMIT $2 \
             ) recent ORDER BY id ASC"
        );
        sqlx::query_as::<_, ChatMessageRow>(&query)
            .bind(job_id)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Highest message id for a job, `0` when there are none.
    pub async fn max_id(pool: &PgPool, job_id: DbId) -> Result<MessageId, sqlx::Error> {
        sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) FROM chat_messages WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(pool)
            .await
    }

    /// Mark a message as read by `reader_id`, which also marks it delivered.
    ///
    /// Returns `true` if the message exists and was not sent by the reader
    /// (already-read messages count).
    pub async fn mark_read(
        pool: &PgPool,
        job_id: DbId,
        message_id: MessageId,
        reader_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE chat_messages SET is_read = true, is_delivered = true \
             WHERE job_id = $1 AND id = $2 AND sender_id <> $3",
        )
        .bind(job_id)
        .bind(message_id)
        .bind(reader_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a message as delivered to at least one peer.
    pub async fn mark_delivered(
        pool: &PgPool,
        job_id: DbId,
        message_id: MessageId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE chat_messages SET is_delivered = true WHERE job_id = $1 AND id = $2",
        )
        .bind(job_id)
        .bind(message_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
