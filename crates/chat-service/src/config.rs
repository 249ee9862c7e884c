//! Chat service configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP + WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default namespace prefix for bus topics.
pub const DEFAULT_TOPIC_PREFIX: &str = "chat:";

/// Default channel for join/leave notices and diagnostic broadcasts.
pub const DEFAULT_CHANNEL: &str = "general";

/// Default bound of each session's outbound queue.
pub const DEFAULT_SESSION_QUEUE_CAPACITY: usize = 256;

/// Default bound of each hub inbound queue.
pub const DEFAULT_HUB_QUEUE_CAPACITY: usize = 1024;

/// Default peer liveness timeout in seconds.
pub const DEFAULT_PONG_WAIT_SECONDS: u64 = 60;

/// Upper bound on the peer liveness timeout in seconds.
pub const MAX_PONG_WAIT_SECONDS: u64 = 3600;

/// Default per-frame write deadline in seconds.
pub const DEFAULT_WRITE_WAIT_SECONDS: u64 = 10;

/// Default maximum inbound frame size in bytes.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 512;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "chat";

/// Chat service configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// Redis connection URL for the pub/sub bus.
    /// Protected by `SecretString` since it may carry a password.
    pub redis_url: SecretString,

    /// HS256 secret shared with the account service that issues user tokens.
    pub jwt_secret: SecretString,

    /// HTTP + WebSocket bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Unique identifier for this instance (log label only).
    pub instance_id: String,

    /// Prefix that namespaces channel names into bus topics (default: "chat:").
    pub topic_prefix: String,

    /// Channel used for join/leave notices and diagnostics (default: "general").
    pub default_channel: String,

    /// Outbound queue bound per session (default: 256).
    pub session_queue_capacity: usize,

    /// Bound of each hub inbound queue (default: 1024).
    pub hub_queue_capacity: usize,

    /// Peer liveness timeout in seconds (default: 60).
    pub pong_wait_seconds: u64,

    /// Per-frame write deadline in seconds (default: 10).
    pub write_wait_seconds: u64,

    /// Maximum inbound frame size in bytes (default: 512).
    pub max_message_bytes: usize,

    /// JWT iat clock skew tolerance in seconds (default: 300, max: 600).
    pub jwt_clock_skew_seconds: u64,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("redis_url", &"[REDACTED]")
            .field("jwt_secret", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("instance_id", &self.instance_id)
            .field("topic_prefix", &self.topic_prefix)
            .field("default_channel", &self.default_channel)
            .field("session_queue_capacity", &self.session_queue_capacity)
            .field("hub_queue_capacity", &self.hub_queue_capacity)
            .field("pong_wait_seconds", &self.pong_wait_seconds)
            .field("write_wait_seconds", &self.write_wait_seconds)
            .field("max_message_bytes", &self.max_message_bytes)
            .field("jwt_clock_skew_seconds", &self.jwt_clock_skew_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let redis_url = SecretString::from(
            vars.get("REDIS_URL")
                .ok_or_else(|| ConfigError::MissingEnvVar("REDIS_URL".to_string()))?
                .clone(),
        );

        let jwt_secret = vars
            .get("CHAT_JWT_SECRET")
            .ok_or_else(|| ConfigError::MissingEnvVar("CHAT_JWT_SECRET".to_string()))?;
        if jwt_secret.is_empty() {
            return Err(ConfigError::InvalidValue(
                "CHAT_JWT_SECRET must not be empty".to_string(),
            ));
        }
        let jwt_secret = SecretString::from(jwt_secret.clone());

        let bind_address = vars
            .get("CHAT_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let topic_prefix = vars
            .get("CHAT_TOPIC_PREFIX")
            .cloned()
            .unwrap_or_else(|| DEFAULT_TOPIC_PREFIX.to_string());

        let default_channel = vars
            .get("CHAT_DEFAULT_CHANNEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_CHANNEL.to_string());
        if default_channel.is_empty() {
            return Err(ConfigError::InvalidValue(
                "CHAT_DEFAULT_CHANNEL must not be empty".to_string(),
            ));
        }

        let session_queue_capacity = parse_positive(
            vars,
            "CHAT_SESSION_QUEUE_CAPACITY",
            DEFAULT_SESSION_QUEUE_CAPACITY,
        )?;
        let hub_queue_capacity =
            parse_positive(vars, "CHAT_HUB_QUEUE_CAPACITY", DEFAULT_HUB_QUEUE_CAPACITY)?;
        let pong_wait_seconds =
            parse_positive(vars, "CHAT_PONG_WAIT_SECONDS", DEFAULT_PONG_WAIT_SECONDS)?;
        if pong_wait_seconds > MAX_PONG_WAIT_SECONDS {
            return Err(ConfigError::InvalidValue(format!(
                "CHAT_PONG_WAIT_SECONDS must be at most {MAX_PONG_WAIT_SECONDS}, got {pong_wait_seconds}"
            )));
        }
        let write_wait_seconds =
            parse_positive(vars, "CHAT_WRITE_WAIT_SECONDS", DEFAULT_WRITE_WAIT_SECONDS)?;
        let max_message_bytes =
            parse_positive(vars, "CHAT_MAX_MESSAGE_BYTES", DEFAULT_MAX_MESSAGE_BYTES)?;

        let jwt_clock_skew_seconds = parse_positive(
            vars,
            "CHAT_JWT_CLOCK_SKEW_SECONDS",
            DEFAULT_CLOCK_SKEW.as_secs(),
        )?;
        if jwt_clock_skew_seconds > MAX_CLOCK_SKEW.as_secs() {
            return Err(ConfigError::InvalidValue(format!(
                "CHAT_JWT_CLOCK_SKEW_SECONDS must be at most {}, got {jwt_clock_skew_seconds}",
                MAX_CLOCK_SKEW.as_secs()
            )));
        }

        // Generate instance ID
        let instance_id = vars.get("CHAT_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            redis_url,
            jwt_secret,
            bind_address,
            instance_id,
            topic_prefix,
            default_channel,
            session_queue_capacity,
            hub_queue_capacity,
            pong_wait_seconds,
            write_wait_seconds,
            max_message_bytes,
            jwt_clock_skew_seconds,
        })
    }

    /// Peer liveness timeout.
    #[must_use]
    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_seconds)
    }

    /// Keepalive ping period: 9/10 of the peer liveness timeout.
    #[must_use]
    pub fn ping_period(&self) -> Duration {
        self.pong_wait() * 9 / 10
    }

    /// Per-frame write deadline.
    #[must_use]
    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_seconds)
    }

    /// JWT iat clock skew tolerance.
    #[must_use]
    pub fn jwt_clock_skew(&self) -> Duration {
        Duration::from_secs(self.jwt_clock_skew_seconds)
    }
}

/// Parse an optional numeric variable that must be greater than zero.
fn parse_positive<T>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    let Some(raw) = vars.get(key) else {
        return Ok(default);
    };

    let value: T = raw
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{key} must be a number, got {raw:?}")))?;

    if value <= T::default() {
        return Err(ConfigError::InvalidValue(format!(
            "{key} must be greater than zero"
        )));
    }

    Ok(value)
}
