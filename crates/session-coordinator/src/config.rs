//! Session coordinator configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default hub mailbox capacity.
pub const DEFAULT_HUB_CHANNEL_CAPACITY: usize = 1000;

/// Default per-connection outbound queue capacity.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Default storage mirror queue capacity.
pub const DEFAULT_MIRROR_QUEUE_CAPACITY: usize = 1024;

/// Default maximum inbound frame size (1 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Default keepalive ping interval in seconds.
pub const DEFAULT_PING_INTERVAL_SECONDS: u64 = 54;

/// Default reader idle limit in seconds. Must exceed the ping interval.
pub const DEFAULT_PONG_TIMEOUT_SECONDS: u64 = 60;

/// Default per-frame write timeout in seconds.
pub const DEFAULT_WRITE_TIMEOUT_SECONDS: u64 = 10;

/// Default participant inactivity expiry in seconds (5 minutes).
pub const DEFAULT_INACTIVITY_TIMEOUT_SECONDS: u64 = 300;

/// Default hub inactivity sweep interval in seconds.
pub const DEFAULT_INACTIVITY_SWEEP_INTERVAL_SECONDS: u64 = 30;

/// Default storage retention window for participant records (24 hours).
pub const DEFAULT_PARTICIPANT_RETENTION_SECONDS: u64 = 86_400;

/// Default retention sweep interval in seconds (1 hour).
pub const DEFAULT_RETENTION_SWEEP_INTERVAL_SECONDS: u64 = 3600;

/// Default per-client-address request quota for the API routes.
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 100;

/// Minimum length of the token signing secret for HS256.
pub const MIN_TOKEN_SECRET_LENGTH: usize = 32;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "sc";

/// Which storage collaborator backs meetings and participant records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process maps. Data is lost on restart.
    Memory,
    /// Redis, via `REDIS_URL`.
    Redis,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            other => Err(ConfigError::InvalidValue(format!(
                "SC_STORE_BACKEND must be 'memory' or 'redis', got '{other}'"
            ))),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Session coordinator configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// HTTP/WebSocket bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Unique identifier for this coordinator instance.
    pub instance_id: String,

    /// HS256 secret used to verify session tokens.
    /// Protected by `SecretString` to prevent accidental logging.
    pub auth_token_secret: SecretString,

    /// Storage backend.
    pub store_backend: StoreBackend,

    /// Redis connection URL, required for the Redis backend.
    pub redis_url: Option<SecretString>,

    /// Allowed browser origins for CORS and the WebSocket handshake.
    /// Empty allows any origin.
    pub allowed_origins: Vec<String>,

    /// API requests allowed per client address per minute.
    pub rate_limit_per_minute: NonZeroU32,

    /// Hub mailbox capacity.
    pub hub_channel_capacity: usize,

    /// Per-connection outbound queue capacity.
    pub outbound_queue_capacity: usize,

    /// Storage mirror queue capacity.
    pub mirror_queue_capacity: usize,

    /// Maximum inbound frame size in bytes.
    pub max_message_bytes: usize,

    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub write_timeout: Duration,

    /// Participant inactivity expiry.
    pub inactivity_timeout: Duration,

    /// Hub inactivity sweep interval.
    pub inactivity_sweep_interval: Duration,

    /// Storage retention window for participant records.
    pub participant_retention: Duration,

    /// Retention sweep interval.
    pub retention_sweep_interval: Duration,

    pub log_format: LogFormat,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("instance_id", &self.instance_id)
            .field("auth_token_secret", &"[REDACTED]")
            .field("store_backend", &self.store_backend)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .field("hub_channel_capacity", &self.hub_channel_capacity)
            .field("outbound_queue_capacity", &self.outbound_queue_capacity)
            .field("mirror_queue_capacity", &self.mirror_queue_capacity)
            .field("max_message_bytes", &self.max_message_bytes)
            .field("ping_interval", &self.ping_interval)
            .field("pong_timeout", &self.pong_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("inactivity_timeout", &self.inactivity_timeout)
            .field("inactivity_sweep_interval", &self.inactivity_sweep_interval)
            .field("participant_retention", &self.participant_retention)
            .field("retention_sweep_interval", &self.retention_sweep_interval)
            .field("log_format", &self.log_format)
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

/// Parse an optional numeric variable, rejecting garbage instead of
/// silently falling back to the default.
fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(format!("{name} must be a number, got '{raw}'"))
        }),
    }
}

fn parse_nonzero(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let value = parse_var(vars, name, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be greater than zero"
        )));
    }
    Ok(value)
}

fn parse_capacity(
    vars: &HashMap<String, String>,
    name: &str,
    default: usize,
) -> Result<usize, ConfigError> {
    let value = parse_var(vars, name, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be greater than zero"
        )));
    }
    Ok(value)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let auth_token_secret = SecretString::from(
            vars.get("SC_AUTH_TOKEN_SECRET")
                .ok_or_else(|| ConfigError::MissingEnvVar("SC_AUTH_TOKEN_SECRET".to_string()))?
                .clone(),
        );

        if auth_token_secret.expose_secret().len() < MIN_TOKEN_SECRET_LENGTH {
            return Err(ConfigError::InvalidValue(format!(
                "SC_AUTH_TOKEN_SECRET must be at least {MIN_TOKEN_SECRET_LENGTH} bytes"
            )));
        }

        let store_backend = match vars.get("SC_STORE_BACKEND") {
            Some(raw) => raw.parse()?,
            None => StoreBackend::Memory,
        };

        let redis_url = vars.get("REDIS_URL").cloned().map(SecretString::from);
        if store_backend == StoreBackend::Redis && redis_url.is_none() {
            return Err(ConfigError::MissingEnvVar("REDIS_URL".to_string()));
        }

        let bind_address = vars
            .get("SC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let allowed_origins = vars
            .get("SC_ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let hub_channel_capacity = parse_capacity(
            vars,
            "SC_HUB_CHANNEL_CAPACITY",
            DEFAULT_HUB_CHANNEL_CAPACITY,
        )?;
        let outbound_queue_capacity = parse_capacity(
            vars,
            "SC_OUTBOUND_QUEUE_CAPACITY",
            DEFAULT_OUTBOUND_QUEUE_CAPACITY,
        )?;
        let mirror_queue_capacity = parse_capacity(
            vars,
            "SC_MIRROR_QUEUE_CAPACITY",
            DEFAULT_MIRROR_QUEUE_CAPACITY,
        )?;
        let max_message_bytes =
            parse_capacity(vars, "SC_MAX_MESSAGE_BYTES", DEFAULT_MAX_MESSAGE_BYTES)?;

        let ping_interval = parse_nonzero(
            vars,
            "SC_PING_INTERVAL_SECONDS",
            DEFAULT_PING_INTERVAL_SECONDS,
        )?;
        let pong_timeout = parse_nonzero(
            vars,
            "SC_PONG_TIMEOUT_SECONDS",
            DEFAULT_PONG_TIMEOUT_SECONDS,
        )?;
        if pong_timeout <= ping_interval {
            return Err(ConfigError::InvalidValue(format!(
                "SC_PONG_TIMEOUT_SECONDS ({pong_timeout}) must exceed SC_PING_INTERVAL_SECONDS ({ping_interval})"
            )));
        }
        let write_timeout = parse_nonzero(
            vars,
            "SC_WRITE_TIMEOUT_SECONDS",
            DEFAULT_WRITE_TIMEOUT_SECONDS,
        )?;

        let inactivity_timeout = parse_nonzero(
            vars,
            "SC_INACTIVITY_TIMEOUT_SECONDS",
            DEFAULT_INACTIVITY_TIMEOUT_SECONDS,
        )?;
        let inactivity_sweep_interval = parse_nonzero(
            vars,
            "SC_INACTIVITY_SWEEP_INTERVAL_SECONDS",
            DEFAULT_INACTIVITY_SWEEP_INTERVAL_SECONDS,
        )?;
        let participant_retention = parse_nonzero(
            vars,
            "SC_PARTICIPANT_RETENTION_SECONDS",
            DEFAULT_PARTICIPANT_RETENTION_SECONDS,
        )?;
        let retention_sweep_interval = parse_nonzero(
            vars,
            "SC_RETENTION_SWEEP_INTERVAL_SECONDS",
            DEFAULT_RETENTION_SWEEP_INTERVAL_SECONDS,
        )?;

        let rate_limit_per_minute = NonZeroU32::new(parse_var(
            vars,
            "SC_RATE_LIMIT_PER_MINUTE",
            DEFAULT_RATE_LIMIT_PER_MINUTE,
        )?)
        .ok_or_else(|| {
            ConfigError::InvalidValue("SC_RATE_LIMIT_PER_MINUTE must be greater than zero".to_string())
        })?;

        let log_format = match vars.get("SC_LOG_FORMAT").map(String::as_str) {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "SC_LOG_FORMAT must be 'text' or 'json', got '{other}'"
                )))
            }
        };

        // Generate instance ID
        let instance_id = vars.get("SC_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            instance_id,
            auth_token_secret,
            store_backend,
            redis_url,
            allowed_origins,
            rate_limit_per_minute,
            hub_channel_capacity,
            outbound_queue_capacity,
            mirror_queue_capacity,
            max_message_bytes,
            ping_interval: Duration::from_secs(ping_interval),
            pong_timeout: Duration::from_secs(pong_timeout),
            write_timeout: Duration::from_secs(write_timeout),
            inactivity_timeout: Duration::from_secs(inactivity_timeout),
            inactivity_sweep_interval: Duration::from_secs(inactivity_sweep_interval),
            participant_retention: Duration::from_secs(participant_retention),
            retention_sweep_interval: Duration::from_secs(retention_sweep_interval),
            log_format,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const TEST_SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([(
            "SC_AUTH_TOKEN_SECRET".to_string(),
            TEST_SECRET.to_string(),
        )])
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&base_vars()).unwrap();

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert!(config.redis_url.is_none());
        assert!(config.allowed_origins.is_empty());
        assert_eq!(config.rate_limit_per_minute.get(), 100);
        assert_eq!(config.hub_channel_capacity, 1000);
        assert_eq!(config.outbound_queue_capacity, 256);
        assert_eq!(config.max_message_bytes, 1024 * 1024);
        assert_eq!(config.ping_interval, Duration::from_secs(54));
        assert_eq!(config.pong_timeout, Duration::from_secs(60));
        assert_eq!(config.write_timeout, Duration::from_secs(10));
        assert_eq!(config.inactivity_timeout, Duration::from_secs(300));
        assert_eq!(config.participant_retention, Duration::from_secs(86_400));
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.instance_id.starts_with("sc-"));
    }

    #[test]
    fn test_overrides() {
        let mut vars = base_vars();
        vars.insert("SC_BIND_ADDRESS".to_string(), "127.0.0.1:9000".to_string());
        vars.insert("SC_INSTANCE_ID".to_string(), "sc-test-1".to_string());
        vars.insert("SC_STORE_BACKEND".to_string(), "Redis".to_string());
        vars.insert("REDIS_URL".to_string(), "redis://localhost:6379".to_string());
        vars.insert(
            "SC_ALLOWED_ORIGINS".to_string(),
            "https://a.example, https://b.example,".to_string(),
        );
        vars.insert("SC_OUTBOUND_QUEUE_CAPACITY".to_string(), "8".to_string());
        vars.insert("SC_RATE_LIMIT_PER_MINUTE".to_string(), "600".to_string());
        vars.insert("SC_INACTIVITY_TIMEOUT_SECONDS".to_string(), "90".to_string());
        vars.insert("SC_LOG_FORMAT".to_string(), "json".to_string());

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.instance_id, "sc-test-1");
        assert_eq!(config.store_backend, StoreBackend::Redis);
        assert_eq!(
            config.redis_url.as_ref().unwrap().expose_secret(),
            "redis://localhost:6379"
        );
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(config.outbound_queue_capacity, 8);
        assert_eq!(config.rate_limit_per_minute.get(), 600);
        assert_eq!(config.inactivity_timeout, Duration::from_secs(90));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_missing_secret() {
        let result = Config::from_vars(&HashMap::new());
        assert!(
            matches!(result, Err(ConfigError::MissingEnvVar(ref v)) if v == "SC_AUTH_TOKEN_SECRET")
        );
    }

    #[test]
    fn test_short_secret_rejected() {
        let vars = HashMap::from([("SC_AUTH_TOKEN_SECRET".to_string(), "short".to_string())]);
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_redis_backend_requires_url() {
        let mut vars = base_vars();
        vars.insert("SC_STORE_BACKEND".to_string(), "redis".to_string());
        assert!(
            matches!(Config::from_vars(&vars), Err(ConfigError::MissingEnvVar(ref v)) if v == "REDIS_URL")
        );
    }

    #[test]
    fn test_invalid_values() {
        for (key, value) in [
            ("SC_STORE_BACKEND", "postgres"),
            ("SC_HUB_CHANNEL_CAPACITY", "lots"),
            ("SC_OUTBOUND_QUEUE_CAPACITY", "0"),
            ("SC_INACTIVITY_TIMEOUT_SECONDS", "0"),
            ("SC_RATE_LIMIT_PER_MINUTE", "0"),
            ("SC_LOG_FORMAT", "xml"),
        ] {
            let mut vars = base_vars();
            vars.insert(key.to_string(), value.to_string());
            assert!(
                matches!(Config::from_vars(&vars), Err(ConfigError::InvalidValue(_))),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_pong_timeout_must_exceed_ping_interval() {
        let mut vars = base_vars();
        vars.insert("SC_PING_INTERVAL_SECONDS".to_string(), "30".to_string());
        vars.insert("SC_PONG_TIMEOUT_SECONDS".to_string(), "30".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut vars = base_vars();
        vars.insert("SC_STORE_BACKEND".to_string(), "redis".to_string());
        vars.insert(
            "REDIS_URL".to_string(),
            "redis://:hunter2@cache:6379".to_string(),
        );
        let config = Config::from_vars(&vars).unwrap();
        let debug = format!("{config:?}");

        assert!(!debug.contains(TEST_SECRET));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
