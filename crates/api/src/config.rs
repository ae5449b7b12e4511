use std::str::FromStr;
use std::time::Duration;

use jobline_core::chat::DEFAULT_ROOM_MESSAGE_CACHE;
use jobline_core::geo::DEFAULT_AVERAGE_SPEED_MPS;
use jobline_core::location::DEFAULT_LOCATION_MIN_INTERVAL_SECS;
use jobline_core::rate_limit::RateLimitPolicies;
use jobline_events::push::DEFAULT_PUSH_QUEUE_CAPACITY;

use crate::auth::jwt::JwtConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for background tasks (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// JWT token configuration (secret, expiry).
    pub jwt: JwtConfig,
    /// Real-time room tuning.
    pub realtime: RealtimeConfig,
    /// Push webhook endpoint. Push notifications are only logged when unset.
    pub push_webhook_url: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    /// | `PUSH_WEBHOOK_URL`     | unset                      |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = env_or("PORT", 3000);

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = env_or("REQUEST_TIMEOUT_SECS", 30);
        let shutdown_timeout_secs: u64 = env_or("SHUTDOWN_TIMEOUT_SECS", 30);

        let push_webhook_url = std::env::var("PUSH_WEBHOOK_URL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            jwt: JwtConfig::from_env(),
            realtime: RealtimeConfig::from_env(),
            push_webhook_url,
        }
    }
}

/// Timing and sizing knobs for sessions and rooms.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Minimum spacing between `location.updated` broadcasts per job.
    pub location_min_interval: Duration,
    /// How long a fresh connection may take to send `session.authenticate`.
    pub auth_timeout: Duration,
    /// Upper bound on every collaborator call.
    pub collaborator_timeout: Duration,
    /// A typing indicator with no refresh is cleared after this long.
    pub typing_timeout: Duration,
    /// Messages returned on a join without a cursor.
    pub resync_window: usize,
    /// Cap on messages returned for a cursor resync.
    pub resync_max_messages: usize,
    /// Messages kept in memory per room.
    pub room_message_cache: usize,
    /// Speed used by the straight-line ETA estimator.
    pub average_speed_mps: f64,
    pub heartbeat_interval: Duration,
    pub push_queue_capacity: usize,
    pub rate_limits: RateLimitPolicies,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            location_min_interval: Duration::from_secs(DEFAULT_LOCATION_MIN_INTERVAL_SECS),
            auth_timeout: Duration::from_secs(10),
            collaborator_timeout: Duration::from_secs(5),
            typing_timeout: Duration::from_secs(6),
            resync_window: 50,
            resync_max_messages: 200,
            room_message_cache: DEFAULT_ROOM_MESSAGE_CACHE,
            average_speed_mps: DEFAULT_AVERAGE_SPEED_MPS,
            heartbeat_interval: Duration::from_secs(30),
            push_queue_capacity: DEFAULT_PUSH_QUEUE_CAPACITY,
            rate_limits: RateLimitPolicies::default(),
        }
    }
}

impl RealtimeConfig {
    /// Load real-time settings from environment variables with defaults.
    ///
    /// | Env Var                      | Default |
    /// |------------------------------|---------|
    /// | `LOCATION_MIN_INTERVAL_SECS` | `10`    |
    /// | `AUTH_TIMEOUT_SECS`          | `10`    |
    /// | `COLLABORATOR_TIMEOUT_SECS`  | `5`     |
    /// | `TYPING_TIMEOUT_SECS`        | `6`     |
    /// | `RESYNC_WINDOW`              | `50`    |
    /// | `RESYNC_MAX_MESSAGES`        | `200`   |
    /// | `ROOM_MESSAGE_CACHE`         | `50`    |
    /// | `AVERAGE_SPEED_MPS`          | `11.0`  |
    /// | `HEARTBEAT_INTERVAL_SECS`    | `30`    |
    /// | `PUSH_QUEUE_CAPACITY`        | `1024`  |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            location_min_interval: Duration::from_secs(env_or(
                "LOCATION_MIN_INTERVAL_SECS",
                defaults.location_min_interval.as_secs(),
            )),
            auth_timeout: Duration::from_secs(env_or(
                "AUTH_TIMEOUT_SECS",
                defaults.auth_timeout.as_secs(),
            )),
            collaborator_timeout: Duration::from_secs(env_or(
                "COLLABORATOR_TIMEOUT_SECS",
                defaults.collaborator_timeout.as_secs(),
            )),
            typing_timeout: Duration::from_secs(env_or(
                "TYPING_TIMEOUT_SECS",
                defaults.typing_timeout.as_secs(),
            )),
            resync_window: env_or("RESYNC_WINDOW", defaults.resync_window),
            resync_max_messages: env_or("RESYNC_MAX_MESSAGES", defaults.resync_max_messages),
            room_message_cache: env_or("ROOM_MESSAGE_CACHE", defaults.room_message_cache),
            average_speed_mps: env_or("AVERAGE_SPEED_MPS", defaults.average_speed_mps),
            heartbeat_interval: Duration::from_secs(env_or(
                "HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval.as_secs(),
            )),
            push_queue_capacity: env_or("PUSH_QUEUE_CAPACITY", defaults.push_queue_capacity),
            rate_limits: defaults.rate_limits,
        }
    }
}

/// Read `name` from the environment, falling back to `default` when unset.
///
/// # Panics
///
/// Panics if the variable is set but does not parse, so misconfiguration
/// fails at startup.
fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{name} must be a valid {}: {e}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}
