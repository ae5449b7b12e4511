//! Per-connection token-bucket rate limiting, keyed by event kind.
//!
//! Uses `tokio::time::Instant` so limits follow the runtime clock (and can be
//! driven deterministically with a paused clock in tests).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Rate-limit class of an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// `room.join` / `room.leave`.
    Room,
    /// `status.transition`.
    Status,
    /// `location.report`.
    Location,
    /// `chat.send`, `chat.typing`, `chat.read`.
    Chat,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Room => "room",
            EventKind::Status => "status",
            EventKind::Location => "location",
            EventKind::Chat => "chat",
        }
    }
}

/// Burst size and steady refill rate of one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitPolicy {
    pub burst: u32,
    pub refill_per_sec: f64,
}

impl RateLimitPolicy {
    pub const fn new(burst: u32, refill_per_sec: f64) -> Self {
        Self {
            burst,
            refill_per_sec,
        }
    }
}

/// Policies for every event kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitPolicies {
    pub room: RateLimitPolicy,
    pub status: RateLimitPolicy,
    pub location: RateLimitPolicy,
    pub chat: RateLimitPolicy,
}

impl RateLimitPolicies {
    pub fn for_kind(&self, kind: EventKind) -> RateLimitPolicy {
        match kind {
            EventKind::Room => self.room,
            EventKind::Status => self.status,
            EventKind::Location => self.location,
            EventKind::Chat => self.chat,
        }
    }
}

impl Default for RateLimitPolicies {
    /// Status: generous burst, low rate. Location: small burst, high rate.
    /// Chat: moderate.
    fn default() -> Self {
        Self {
            room: RateLimitPolicy::new(10, 1.0),
            status: RateLimitPolicy::new(5, 0.2),
            location: RateLimitPolicy::new(3, 1.0),
            chat: RateLimitPolicy::new(10, 2.0),
        }
    }
}

// ---------------------------------------------------------------------------
// TokenBucket
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket as of `now`.
    pub fn new_at(policy: RateLimitPolicy, now: Instant) -> Self {
        let capacity = f64::from(policy.burst.max(1));
        Self {
            capacity,
            refill_per_sec: policy.refill_per_sec.max(0.0),
            tokens: capacity,
            last_refill: now,
        }
    }

    pub fn new(policy: RateLimitPolicy) -> Self {
        Self::new_at(policy, Instant::now())
    }

    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
        if self.tokens < 1.0 {
            return false;
        }
        self.tokens -= 1.0;
        true
    }

    /// How long until one token is available, if none is now.
    pub fn retry_after(&self) -> Option<Duration> {
        if self.tokens >= 1.0 || self.refill_per_sec <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64((1.0 - self.tokens) / self.refill_per_sec))
    }
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// One connection's set of buckets. Buckets are created lazily per kind.
#[derive(Debug)]
pub struct RateLimiter {
    policies: RateLimitPolicies,
    buckets: HashMap<EventKind, TokenBucket>,
}

impl RateLimiter {
    pub fn new(policies: RateLimitPolicies) -> Self {
        Self {
            policies,
            buckets: HashMap::new(),
        }
    }

    /// Take a token for `kind`. On refusal returns the suggested back-off.
    pub fn check(&mut self, kind: EventKind) -> Result<(), Option<Duration>> {
        let policy = self.policies.for_kind(kind);
        let bucket = self
            .buckets
            .entry(kind)
            .or_insert_with(|| TokenBucket::new(policy));
        if bucket.try_acquire() {
            Ok(())
        } else {
            Err(bucket.retry_after())
        }
    }
}
