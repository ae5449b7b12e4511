//! Chat messages, typing indicators and read receipts.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use jobline_core::chat::{validate_attachment_ref, validate_body, ChatMessage};
use jobline_core::error::CoreError;
use jobline_core::protocol::ServerEvent;
use jobline_core::types::{ActorId, JobId, MessageId};
use tokio::task::AbortHandle;
use uuid::Uuid;

use super::room::{Room, RoomState};
use super::session::Session;
use super::{persistence_failed, RealtimeHub};

/// Per-room table of typing-indicator expiry timers, one per actor.
///
/// Each armed timer carries a generation so a timer that fires after being
/// replaced does not clear the newer indicator.
#[derive(Debug, Default)]
pub struct TypingTimers {
    next_generation: u64,
    timers: HashMap<ActorId, TypingTimer>,
}

#[derive(Debug)]
struct TypingTimer {
    generation: u64,
    conn_id: Uuid,
    handle: AbortHandle,
}

impl TypingTimers {
    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Arm a timer for `actor_id`, replacing any running one. Returns whether
    /// the actor was already typing.
    fn arm(&mut self, actor_id: ActorId, conn_id: Uuid, generation: u64, handle: AbortHandle) -> bool {
        let previous = self.timers.insert(
            actor_id,
            TypingTimer {
                generation,
                conn_id,
                handle,
            },
        );
        match previous {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Stop the actor's timer. Returns the connection that was typing.
    pub fn cancel(&mut self, actor_id: ActorId) -> Option<Uuid> {
        let timer = self.timers.remove(&actor_id)?;
        timer.handle.abort();
        Some(timer.conn_id)
    }

    /// Remove a timer that fired, unless it has since been replaced.
    fn expire(&mut self, actor_id: ActorId, generation: u64) -> Option<Uuid> {
        match self.timers.get(&actor_id) {
            Some(timer) if timer.generation == generation => {
                self.timers.remove(&actor_id).map(|t| t.conn_id)
            }
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl RealtimeHub {
    /// Persist a chat message, then fan it out.
    ///
    /// The message id comes from the room's per-job counter. A message that
    /// fails to persist is never broadcast; its id is not reused.
    pub(crate) async fn send_message(
        &self,
        session: &Arc<Session>,
        job_id: JobId,
        body: String,
        attachment_ref: Option<String>,
    ) -> Result<MessageId, CoreError> {
        let body = validate_body(&body)?;
        validate_attachment_ref(attachment_ref.as_deref())?;

        let room = self.joined_room(session, job_id).await?;
        let mut state = room.lock().await;
        state.require_member(session)?;

        let mut message = ChatMessage {
            id: state.allocate_message_id(),
            job_id,
            sender_id: session.actor_id,
            body,
            attachment_ref,
            created_at: Utc::now(),
            delivered: false,
            read: false,
        };
        if let Err(e) = self.call(self.collaborators.messages.append(&message)).await {
            state.abandoned_messages.insert(message.id);
            return Err(persistence_failed("append", e));
        }

        if let Some(conn_id) = state.typing.cancel(session.actor_id) {
            state.broadcast(
                &ServerEvent::TypingIndicator {
                    job_id,
                    sender_id: session.actor_id,
                    is_typing: false,
                },
                Some(conn_id),
            );
        }

        let event = ServerEvent::ChatNew {
            message: message.clone(),
        };
        let delivered = state.broadcast(&event, Some(session.conn_id));
        message.delivered = delivered > 0;
        let message_id = message.id;
        state.messages.push(message);

        session.send(&ServerEvent::message_ack(job_id, message_id));
        self.notify_offline(&state, &event);
        drop(state);

        if delivered > 0 {
            self.mark_delivered(job_id, vec![message_id]);
        }
        tracing::debug!(
            actor_id = session.actor_id,
            job_id,
            message_id,
            delivered,
            "Chat message sent"
        );
        Ok(message_id)
    }

    /// Persist the delivered flag in the background.
    fn mark_delivered(&self, job_id: JobId, message_ids: Vec<MessageId>) {
        let messages = Arc::clone(&self.collaborators.messages);
        let timeout = self.config.collaborator_timeout;
        tokio::spawn(async move {
            for message_id in message_ids {
                match tokio::time::timeout(timeout, messages.mark_delivered(job_id, message_id)).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(job_id, message_id, error = %e, "Failed to mark message delivered")
                    }
                    Err(_) => tracing::warn!(job_id, message_id, "Marking message delivered timed out"),
                }
            }
        });
    }

    /// Flag messages handed to `recipient` in a resync as delivered, in the
    /// payload, the room cache and storage. The recipient's own messages are
    /// left alone.
    pub(crate) fn deliver_backlog(
        &self,
        state: &mut RoomState,
        messages: &mut [ChatMessage],
        recipient: ActorId,
    ) {
        let mut newly_delivered = Vec::new();
        for message in messages.iter_mut() {
            if message.delivered || message.sender_id == recipient {
                continue;
            }
            message.delivered = true;
            state.messages.mark_delivered(message.id);
            newly_delivered.push(message.id);
        }
        if !newly_delivered.is_empty() {
            tracing::debug!(
                job_id = state.job_id,
                recipient,
                count = newly_delivered.len(),
                "Backlog delivered on join"
            );
            self.mark_delivered(state.job_id, newly_delivered);
        }
    }

    /// Start or stop the sender's typing indicator.
    ///
    /// A started indicator clears itself after `typing_timeout` unless
    /// refreshed.
    pub(crate) async fn set_typing(
        self: &Arc<Self>,
        session: &Arc<Session>,
        job_id: JobId,
        is_typing: bool,
    ) -> Result<(), CoreError> {
        let room = self.joined_room(session, job_id).await?;
        let mut state = room.lock().await;
        state.require_member(session)?;

        let changed = if is_typing {
            let generation = state.typing.next_generation();
            let hub = Arc::clone(self);
            let timer_room = Arc::clone(&room);
            let actor_id = session.actor_id;
            let timeout = self.config.typing_timeout;
            let handle = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                hub.expire_typing(&timer_room, actor_id, generation).await;
            });
            !state
                .typing
                .arm(actor_id, session.conn_id, generation, handle.abort_handle())
        } else {
            state.typing.cancel(session.actor_id).is_some()
        };

        if changed {
            state.broadcast(
                &ServerEvent::TypingIndicator {
                    job_id,
                    sender_id: session.actor_id,
                    is_typing,
                },
                Some(session.conn_id),
            );
        }
        Ok(())
    }

    async fn expire_typing(&self, room: &Arc<Room>, actor_id: ActorId, generation: u64) {
        let mut state = room.lock().await;
        if let Some(conn_id) = state.typing.expire(actor_id, generation) {
            state.broadcast(
                &ServerEvent::TypingIndicator {
                    job_id: room.job_id,
                    sender_id: actor_id,
                    is_typing: false,
                },
                Some(conn_id),
            );
            tracing::debug!(job_id = room.job_id, actor_id, "Typing indicator expired");
        }
    }

    /// Record that the reader has seen `message_id` and tell the room.
    pub(crate) async fn mark_read(
        &self,
        session: &Arc<Session>,
        job_id: JobId,
        message_id: MessageId,
    ) -> Result<(), CoreError> {
        let room = self.joined_room(session, job_id).await?;
        let mut state = room.lock().await;
        state.require_member(session)?;

        if message_id <= 0
            || message_id > state.last_message_id
            || state.abandoned_messages.contains(&message_id)
        {
            return Err(CoreError::InvalidEvent(format!(
                "Unknown message {message_id} in job {job_id}"
            )));
        }
        if state
            .messages
            .get(message_id)
            .is_some_and(|m| m.sender_id == session.actor_id)
        {
            return Err(CoreError::InvalidEvent(format!(
                "Message {message_id} was sent by the reader"
            )));
        }
        let found = self
            .call(
                self.collaborators
                    .messages
                    .mark_read(job_id, message_id, session.actor_id),
            )
            .await
            .map_err(|e| persistence_failed("mark_read", e))?;
        if !found {
            return Err(CoreError::InvalidEvent(format!(
                "No message {message_id} from another participant in job {job_id}"
            )));
        }

        state.messages.mark_read(message_id);
        state.broadcast(
            &ServerEvent::ReadReceipt {
                job_id,
                message_id,
                reader_id: session.actor_id,
            },
            Some(session.conn_id),
        );
        session.send(&ServerEvent::ack(job_id, "chat.read"));
        Ok(())
    }
}
