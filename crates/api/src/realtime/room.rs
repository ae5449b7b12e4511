//! Job rooms: membership, cached last-known state, and fan-out.
//!
//! Every mutation of a room's members or cached state, and every broadcast
//! to it, happens while holding that room's `tokio::sync::Mutex`. This
//! serialises dispatch per job, so members observe a job's events in the
//! order they were accepted.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use jobline_core::chat::MessageCache;
use jobline_core::collaborators::{Participants, StatusSnapshot};
use jobline_core::error::CoreError;
use jobline_core::geo::GeoPoint;
use jobline_core::job_status::{JobStatus, JobStatusEvent};
use jobline_core::location::{LocationSample, LocationWindow};
use jobline_core::protocol::ServerEvent;
use jobline_core::types::{ActorId, JobId, MessageId};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::task::AbortHandle;
use uuid::Uuid;

use super::messaging::TypingTimers;
use super::session::{encode_event, Session};

pub struct Room {
    pub job_id: JobId,
    /// Set once the room has been retired; a retired room accepts no joins.
    removed: AtomicBool,
    state: Mutex<RoomState>,
}

impl Room {
    fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            removed: AtomicBool::new(false),
            state: Mutex::new(RoomState::new(job_id)),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().await
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
}

/// State guarded by the room lock.
pub struct RoomState {
    pub job_id: JobId,
    members: HashMap<Uuid, Weak<Session>>,
    /// Entitled actors, from the participant lookup at the latest join.
    pub participants: Option<Participants>,
    /// `None` until the first successful join seeds the room.
    pub status: Option<JobStatus>,
    pub status_event: Option<JobStatusEvent>,
    pub location: Option<LocationSample>,
    /// The worker has no live connection in the room.
    pub location_stale: bool,
    /// Cached destination lookup. The outer `None` means not fetched yet.
    pub destination: Option<Option<GeoPoint>>,
    pub messages: MessageCache,
    /// Highest message id handed out so far.
    pub last_message_id: MessageId,
    /// Ids whose append failed. The write may still land in storage, so
    /// these are filtered out of storage-backed resyncs.
    pub abandoned_messages: HashSet<MessageId>,
    pub location_window: LocationWindow,
    pub location_flush: Option<AbortHandle>,
    pub typing: TypingTimers,
}

impl RoomState {
    fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            members: HashMap::new(),
            participants: None,
            status: None,
            status_event: None,
            location: None,
            location_stale: false,
            destination: None,
            messages: MessageCache::new(1, 0),
            last_message_id: 0,
            abandoned_messages: HashSet::new(),
            location_window: LocationWindow::new(),
            location_flush: None,
            typing: TypingTimers::default(),
        }
    }

    pub fn is_seeded(&self) -> bool {
        self.status.is_some()
    }

    /// Load persisted state into a fresh room.
    pub fn seed(&mut self, snapshot: StatusSnapshot, latest_message_id: MessageId, cache_capacity: usize) {
        self.status = Some(snapshot.status);
        self.status_event = snapshot.last_event;
        self.messages = MessageCache::new(cache_capacity, latest_message_id);
        self.last_message_id = latest_message_id;
    }

    /// Replace the cached status with what storage holds.
    ///
    /// Returns the stored event to announce when the status moved.
    pub fn apply_snapshot(&mut self, snapshot: StatusSnapshot) -> Option<JobStatusEvent> {
        if self.status == Some(snapshot.status) {
            return None;
        }
        self.status = Some(snapshot.status);
        self.status_event = snapshot.last_event;
        if !snapshot.status.tracks_location() {
            self.stop_location_tracking();
        }
        self.status_event
            .clone()
            .filter(|event| event.to_status == snapshot.status)
    }

    /// Abort the pending location flush and drop its sample.
    pub fn stop_location_tracking(&mut self) {
        if let Some(flush) = self.location_flush.take() {
            flush.abort();
        }
        self.location_window.discard();
    }

    /// Cached status of a seeded room.
    pub fn status(&self) -> Result<JobStatus, CoreError> {
        self.status
            .ok_or_else(|| CoreError::Forbidden(format!("Not a member of job {}", self.job_id)))
    }

    /// Hand out the next message id. Ids are never reused, even when the
    /// message they were allocated for fails to persist.
    pub fn allocate_message_id(&mut self) -> MessageId {
        self.last_message_id += 1;
        self.last_message_id
    }

    // -- membership ----------------------------------------------------------

    pub fn add_member(&mut self, session: &Arc<Session>) {
        self.members.insert(session.conn_id, Arc::downgrade(session));
    }

    /// Returns `false` if the connection was not a member.
    pub fn remove_member(&mut self, conn_id: Uuid) -> bool {
        self.members.remove(&conn_id).is_some()
    }

    pub fn is_member(&self, conn_id: Uuid) -> bool {
        self.members.contains_key(&conn_id)
    }

    /// Require `session` to have joined this room.
    pub fn require_member(&self, session: &Session) -> Result<(), CoreError> {
        if self.is_member(session.conn_id) {
            Ok(())
        } else {
            Err(CoreError::Forbidden(format!(
                "Join job {} before sending events to it",
                self.job_id
            )))
        }
    }

    pub fn live_members(&self) -> Vec<Arc<Session>> {
        self.members.values().filter_map(Weak::upgrade).collect()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Actors with a live connection in the room, ascending.
    pub fn online_actors(&self) -> Vec<ActorId> {
        let mut actors: Vec<ActorId> = self
            .live_members()
            .iter()
            .filter(|s| !s.is_closed())
            .map(|s| s.actor_id)
            .collect();
        actors.sort_unstable();
        actors.dedup();
        actors
    }

    /// Participants with no live connection in the room.
    pub fn offline_participants(&self) -> Vec<ActorId> {
        let online = self.online_actors();
        self.participants
            .as_ref()
            .map(|p| {
                p.all()
                    .into_iter()
                    .filter(|actor| !online.contains(actor))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_worker(&self, actor_id: ActorId) -> bool {
        self.participants
            .as_ref()
            .is_some_and(|p| p.worker_id == Some(actor_id))
    }

    /// Whether the job's worker still has a live connection in the room.
    pub fn worker_online(&self) -> bool {
        let Some(worker_id) = self.participants.as_ref().and_then(|p| p.worker_id) else {
            return false;
        };
        self.online_actors().contains(&worker_id)
    }

    // -- fan-out ---------------------------------------------------------------

    /// Deliver `event` to every member except `exclude`.
    ///
    /// A member whose connection is gone is dropped from the room (implicit
    /// leave). Returns how many members received the event.
    pub fn broadcast(&mut self, event: &ServerEvent, exclude: Option<Uuid>) -> usize {
        let Some(frame) = encode_event(event) else {
            return 0;
        };

        let mut delivered = 0;
        let mut departed = Vec::new();
        let mut worker_departed = false;
        for (conn_id, member) in &self.members {
            if Some(*conn_id) == exclude {
                continue;
            }
            match member.upgrade() {
                Some(session) if session.send_frame(frame.clone()) => delivered += 1,
                Some(session) => {
                    session.remove_room(self.job_id);
                    worker_departed |= self.is_worker(session.actor_id);
                    departed.push(*conn_id);
                }
                None => departed.push(*conn_id),
            }
        }

        for conn_id in departed {
            self.members.remove(&conn_id);
            tracing::debug!(job_id = self.job_id, %conn_id, "Implicit leave on failed delivery");
        }
        if worker_departed {
            self.mark_location_stale();
        }
        delivered
    }

    /// Flag the latest location as stale once the worker has no live
    /// connection left, telling the remaining members.
    pub fn mark_location_stale(&mut self) {
        if self.location_stale || self.worker_online() {
            return;
        }
        self.location_stale = true;
        if self.status.is_some_and(|s| s.tracks_location()) {
            let job_id = self.job_id;
            self.broadcast(&ServerEvent::LocationStale { job_id }, None);
            tracing::info!(job_id, "Worker location marked stale");
        }
    }

    // -- lifecycle -------------------------------------------------------------

    /// No live members, and nothing more can happen in the room.
    pub fn is_idle(&self) -> bool {
        let terminal = self.status.map_or(true, |s| s.is_terminal());
        terminal && self.live_members().is_empty()
    }

    /// Abort the location flush and every typing timer.
    pub fn cancel_timers(&mut self) {
        self.stop_location_tracking();
        self.typing.clear();
    }
}

// ---------------------------------------------------------------------------
// RoomRegistry
// ---------------------------------------------------------------------------

/// Maps job ids to rooms. The single owner of room membership.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<JobId, Arc<Room>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// The live room for `job_id`, created if absent or retired.
    pub async fn get_or_create(&self, job_id: JobId) -> Arc<Room> {
        if let Some(room) = self.get(job_id).await {
            return room;
        }
        let mut rooms = self.rooms.write().await;
        match rooms.get(&job_id) {
            Some(room) if !room.is_removed() => Arc::clone(room),
            _ => {
                let room = Arc::new(Room::new(job_id));
                rooms.insert(job_id, Arc::clone(&room));
                tracing::debug!(job_id, "Room created");
                room
            }
        }
    }

    pub async fn get(&self, job_id: JobId) -> Option<Arc<Room>> {
        self.rooms
            .read()
            .await
            .get(&job_id)
            .filter(|room| !room.is_removed())
            .cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn all(&self) -> Vec<Arc<Room>> {
        self.rooms.read().await.values().cloned().collect()
    }

    /// Retire `room` if it is idle. Must be called without the room lock.
    pub async fn release(&self, room: &Arc<Room>) -> bool {
        {
            let mut state = room.lock().await;
            if room.is_removed() || !state.is_idle() {
                return false;
            }
            room.removed.store(true, Ordering::Release);
            state.cancel_timers();
        }
        self.forget(room).await;
        true
    }

    /// Retire every idle room whose lock is free. Returns how many went.
    pub async fn sweep_idle(&self) -> usize {
        let mut retired = Vec::new();
        for room in self.all().await {
            let Ok(mut state) = room.state.try_lock() else {
                continue;
            };
            if !room.is_removed() && state.is_idle() {
                room.removed.store(true, Ordering::Release);
                state.cancel_timers();
                drop(state);
                retired.push(room);
            }
        }
        for room in &retired {
            self.forget(room).await;
        }
        retired.len()
    }

    async fn forget(&self, room: &Arc<Room>) {
        let mut rooms = self.rooms.write().await;
        if rooms.get(&room.job_id).is_some_and(|r| Arc::ptr_eq(r, room)) {
            rooms.remove(&room.job_id);
            tracing::debug!(job_id = room.job_id, "Room removed");
        }
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
