//! Notification Fallback Dispatcher.
//!
//! Real-time subsystems call [`PushFallback::notify`] for participants who are
//! not connected to the job's room. The call never blocks: notifications go
//! into a bounded queue that a background worker drains into the configured
//! [`PushDispatcher`]. Push is best effort; a full queue is logged and the
//! notification dropped.

use std::sync::Arc;

use jobline_core::collaborators::PushDispatcher;
use jobline_core::types::{ActorId, JobId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default queue capacity.
pub const DEFAULT_PUSH_QUEUE_CAPACITY: usize = 1024;

/// One queued notification.
#[derive(Debug, Clone)]
pub struct PushNotification {
    pub actor_id: ActorId,
    pub job_id: JobId,
    pub payload: serde_json::Value,
}

/// Cloneable handle to the push queue.
#[derive(Clone)]
pub struct PushFallback {
    sender: mpsc::Sender<PushNotification>,
}

impl PushFallback {
    /// Start the worker and return the queue handle plus the worker task.
    ///
    /// The worker exits when `cancel` fires or every handle is dropped.
    pub fn spawn(
        dispatcher: Arc<dyn PushDispatcher>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_worker(dispatcher, receiver, cancel));
        (Self { sender }, handle)
    }

    /// Queue `payload` for each of `actor_ids`. Returns how many were queued.
    pub fn notify(&self, job_id: JobId, actor_ids: &[ActorId], payload: &serde_json::Value) -> usize {
        let mut queued = 0;
        for &actor_id in actor_ids {
            let notification = PushNotification {
                actor_id,
                job_id,
                payload: payload.clone(),
            };
            match self.sender.try_send(notification) {
                Ok(()) => queued += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(actor_id, job_id, "Push queue full, dropping notification");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::warn!(actor_id, job_id, "Push worker stopped, dropping notification");
                }
            }
        }
        queued
    }
}

async fn run_worker(
    dispatcher: Arc<dyn PushDispatcher>,
    mut receiver: mpsc::Receiver<PushNotification>,
    cancel: CancellationToken,
) {
    tracing::info!("Push fallback worker started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Push fallback worker cancelled");
                break;
            }
            next = receiver.recv() => {
                let Some(notification) = next else {
                    tracing::info!("Push queue closed, worker shutting down");
                    break;
                };
                if let Err(e) = dispatcher
                    .enqueue(notification.actor_id, &notification.payload)
                    .await
                {
                    tracing::error!(
                        actor_id = notification.actor_id,
                        job_id = notification.job_id,
                        error = %e,
                        "Failed to dispatch push notification"
                    );
                }
            }
        }
    }
}
