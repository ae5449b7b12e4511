//! Authenticated connections and the registry that owns them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::body::Bytes;
use axum::extract::ws::Message;
use chrono::Utc;
use jobline_core::error::CoreError;
use jobline_core::protocol::ServerEvent;
use jobline_core::rate_limit::{EventKind, RateLimitPolicies, RateLimiter};
use jobline_core::roles::Role;
use jobline_core::types::{ActorId, JobId, Timestamp};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// One authenticated connection.
///
/// Owned by the [`SessionRegistry`]; rooms only hold `Weak` references.
pub struct Session {
    pub conn_id: Uuid,
    pub actor_id: ActorId,
    /// Role asserted by the claim. Per-job roles come from participant lookup.
    pub role: Role,
    pub expires_at: Timestamp,
    pub connected_at: Timestamp,
    sender: WsSender,
    rooms: Mutex<HashSet<JobId>>,
    last_seen: Mutex<Timestamp>,
    limiter: Mutex<RateLimiter>,
    cancel: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Encode an outbound event as a text frame.
pub(crate) fn encode_event(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize event");
            None
        }
    }
}

impl Session {
    pub fn new(
        actor_id: ActorId,
        role: Role,
        expires_at: Timestamp,
        sender: WsSender,
        policies: RateLimitPolicies,
    ) -> Self {
        let now = Utc::now();
        Self {
            conn_id: Uuid::new_v4(),
            actor_id,
            role,
            expires_at,
            connected_at: now,
            sender,
            rooms: Mutex::new(HashSet::new()),
            last_seen: Mutex::new(now),
            limiter: Mutex::new(RateLimiter::new(policies)),
            cancel: CancellationToken::new(),
        }
    }

    /// Queue an event for the writer task. Returns `false` if the connection
    /// is gone.
    pub fn send(&self, event: &ServerEvent) -> bool {
        match encode_event(event) {
            Some(frame) => self.send_frame(frame),
            None => false,
        }
    }

    /// Queue an already-encoded frame. Used by room fan-out, which encodes
    /// once per broadcast.
    pub(crate) fn send_frame(&self, frame: Message) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.sender.send(frame).is_ok()
    }

    pub fn send_error(&self, err: &CoreError) -> bool {
        self.send(&ServerEvent::error(err))
    }

    pub fn ping(&self) -> bool {
        self.sender.send(Message::Ping(Bytes::new())).is_ok()
    }

    /// Send an optional final error, then a Close frame, and cancel any
    /// pending work for this connection.
    pub fn close(&self, reason: Option<&CoreError>) {
        if let Some(err) = reason {
            self.send_error(err);
        }
        let _ = self.sender.send(Message::Close(None));
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.sender.is_closed()
    }

    /// Fires when the session is closed or superseded.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }

    /// Re-check the claim expiry before a privileged action.
    pub fn ensure_active(&self) -> Result<(), CoreError> {
        if self.is_expired_at(Utc::now()) {
            return Err(CoreError::Unauthorized("claim expired".into()));
        }
        Ok(())
    }

    pub fn touch(&self) {
        *lock(&self.last_seen) = Utc::now();
    }

    pub fn last_seen(&self) -> Timestamp {
        *lock(&self.last_seen)
    }

    /// Take one token from the bucket for `kind`.
    pub fn check_rate(&self, kind: EventKind) -> Result<(), CoreError> {
        lock(&self.limiter).check(kind).map_err(|retry| {
            let message = match retry {
                Some(wait) => format!(
                    "Too many {} events, retry in {} ms",
                    kind.as_str(),
                    wait.as_millis()
                ),
                None => format!("Too many {} events", kind.as_str()),
            };
            CoreError::RateLimited(message)
        })
    }

    pub fn rooms(&self) -> Vec<JobId> {
        let mut rooms: Vec<JobId> = lock(&self.rooms).iter().copied().collect();
        rooms.sort_unstable();
        rooms
    }

    pub fn in_room(&self, job_id: JobId) -> bool {
        lock(&self.rooms).contains(&job_id)
    }

    pub(crate) fn add_room(&self, job_id: JobId) {
        lock(&self.rooms).insert(job_id);
    }

    /// Returns `false` if the session was not in the room.
    pub(crate) fn remove_room(&self, job_id: JobId) -> bool {
        lock(&self.rooms).remove(&job_id)
    }

    /// Empty the room set, returning what it held.
    pub(crate) fn take_rooms(&self) -> Vec<JobId> {
        let mut rooms: Vec<JobId> = lock(&self.rooms).drain().collect();
        rooms.sort_unstable();
        rooms
    }
}

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

/// Live sessions keyed by actor. One connection per actor: registering a new
/// session for an actor hands back the one it replaced.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ActorId, Arc<Session>>>,
}

impl SessionRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register `session`, returning the session it superseded, if any.
    pub async fn register(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        self.sessions
            .write()
            .await
            .insert(session.actor_id, session)
    }

    /// Remove `session` if it is still the registered one for its actor.
    ///
    /// A superseded session never evicts its replacement.
    pub async fn remove(&self, session: &Session) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&session.actor_id) {
            Some(current) if current.conn_id == session.conn_id => {
                sessions.remove(&session.actor_id);
                true
            }
            _ => false,
        }
    }

    pub async fn get(&self, actor_id: ActorId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&actor_id).cloned()
    }

    pub async fn is_connected(&self, actor_id: ActorId) -> bool {
        self.sessions.read().await.contains_key(&actor_id)
    }

    /// Return the current number of live sessions.
    pub async fn connection_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Send a Ping frame to every session.
    pub async fn ping_all(&self) {
        let sessions = self.sessions.read().await;
        for session in sessions.values() {
            session.ping();
        }
    }

    /// Sessions whose claim expired at or before `now`.
    pub async fn expired(&self, now: Timestamp) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_expired_at(now))
            .cloned()
            .collect()
    }

    /// Remove and return every session.
    pub async fn drain(&self) -> Vec<Arc<Session>> {
        self.sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
