/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identity of an authenticated party (requester, worker, or observer).
pub type ActorId = DbId;

/// Identity of a service job; also the key of its real-time room.
pub type JobId = DbId;

/// Per-job chat message sequence number. Starts at 1.
pub type MessageId = i64;
