// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{MonitorError, Result};

/// Connection settings for the key-value client
#[derive(Clone, Serialize, Deserialize)]
pub struct KvClientConfig {
    /// Redis server host
    #[serde(default = "default_host")]
    pub host: String,

    /// Redis server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Password, if the server requires AUTH
    #[serde(default)]
    pub credential: Option<String>,

    /// Logical database number
    #[serde(default)]
    pub database_index: i64,

    /// Upper bound on pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Deadline for a single command, and for waiting on a pool checkout
    #[serde(default = "default_socket_timeout", with = "duration_serde")]
    pub socket_timeout: Duration,

    /// Deadline for establishing a new connection
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Retry a timed-out command once on a fresh connection
    #[serde(default = "default_retry_on_timeout")]
    pub retry_on_timeout: bool,

    /// Minimum time between two connectivity probes
    #[serde(default = "default_health_check_interval", with = "duration_serde")]
    pub health_check_interval: Duration,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_max_connections() -> usize {
    50
}

fn default_socket_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_retry_on_timeout() -> bool {
    true
}

fn default_health_check_interval() -> Duration {
    Duration::from_secs(30)
}

impl Default for KvClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            credential: None,
            database_index: 0,
            max_connections: default_max_connections(),
            socket_timeout: default_socket_timeout(),
            connect_timeout: default_connect_timeout(),
            retry_on_timeout: default_retry_on_timeout(),
            health_check_interval: default_health_check_interval(),
        }
    }
}

// Manually implement Debug so the credential never reaches logs
impl fmt::Debug for KvClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("credential", &self.credential.as_ref().map(|_| "***"))
            .field("database_index", &self.database_index)
            .field("max_connections", &self.max_connections)
            .field("socket_timeout", &self.socket_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("retry_on_timeout", &self.retry_on_timeout)
            .field("health_check_interval", &self.health_check_interval)
            .finish()
    }
}

impl KvClientConfig {
    /// Builds a config for `host:port` with every other option at its default.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// `host:port/db`, safe to log (never includes the credential).
    pub fn target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database_index)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(MonitorError::Config("host must not be empty".to_string()));
        }
        if self.max_connections == 0 {
            return Err(MonitorError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.socket_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(MonitorError::Config(
                "socket and connect timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the sliding window rate limiter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Requests allowed per window when the caller passes no limit
    #[serde(default = "default_limit")]
    pub default_limit: u64,

    /// Window length in seconds when the caller passes no window
    #[serde(default = "default_window_secs")]
    pub default_window_secs: u64,

    /// Key prefix to use for all keys in storage
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_limit() -> u64 {
    100
}

fn default_window_secs() -> u64 {
    60
}

fn default_key_prefix() -> String {
    "rate_limit".to_string()
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            default_window_secs: default_window_secs(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl RateLimiterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_limit == 0 || self.default_window_secs == 0 {
            return Err(MonitorError::Config(
                "default_limit and default_window_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the background task scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often a task is processed
    #[serde(default = "default_task_interval", with = "duration_serde")]
    pub task_interval: Duration,

    /// Upper bound of the simulated processing time per task
    #[serde(default = "default_max_processing", with = "duration_serde")]
    pub max_processing: Duration,

    /// The worker counts as ready while its last task is younger than this
    #[serde(default = "default_ready_window", with = "duration_serde")]
    pub ready_window: Duration,
}

fn default_task_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_max_processing() -> Duration {
    Duration::from_secs(2)
}

fn default_ready_window() -> Duration {
    Duration::from_secs(30)
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            task_interval: default_task_interval(),
            max_processing: default_max_processing(),
            ready_window: default_ready_window(),
        }
    }
}

/// Everything the service binary needs, usually loaded from the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub store: KvClientConfig,

    #[serde(default)]
    pub rate_limit: RateLimiterConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_service_name() -> String {
    "health-monitor".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: default_environment(),
            store: KvClientConfig::default(),
            rate_limit: RateLimiterConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Reads configuration from environment variables. Unset variables keep
    /// their defaults; set but unparsable ones are an error.
    pub fn from_env() -> Result<Self> {
        let defaults = KvClientConfig::default();
        let store = KvClientConfig {
            host: env_or("REDIS_HOST", defaults.host)?,
            port: env_or("REDIS_PORT", defaults.port)?,
            credential: std::env::var("REDIS_PASSWORD")
                .ok()
                .filter(|password| !password.is_empty()),
            database_index: env_or("REDIS_DB", defaults.database_index)?,
            max_connections: env_or("REDIS_MAX_CONNECTIONS", defaults.max_connections)?,
            socket_timeout: env_secs_or("REDIS_SOCKET_TIMEOUT_SECS", defaults.socket_timeout)?,
            connect_timeout: env_secs_or(
                "REDIS_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout,
            )?,
            retry_on_timeout: env_or("REDIS_RETRY_ON_TIMEOUT", defaults.retry_on_timeout)?,
            health_check_interval: env_secs_or(
                "REDIS_HEALTH_CHECK_INTERVAL_SECS",
                defaults.health_check_interval,
            )?,
        };

        let limiter_defaults = RateLimiterConfig::default();
        let rate_limit = RateLimiterConfig {
            default_limit: env_or("RATE_LIMIT_DEFAULT", limiter_defaults.default_limit)?,
            default_window_secs: env_or(
                "RATE_LIMIT_WINDOW_SECS",
                limiter_defaults.default_window_secs,
            )?,
            key_prefix: env_or("RATE_LIMIT_KEY_PREFIX", limiter_defaults.key_prefix)?,
        };

        let scheduler_defaults = SchedulerConfig::default();
        let scheduler = SchedulerConfig {
            task_interval: env_secs_or(
                "WORKER_TASK_INTERVAL_SECS",
                scheduler_defaults.task_interval,
            )?,
            max_processing: scheduler_defaults.max_processing,
            ready_window: env_secs_or(
                "WORKER_READY_WINDOW_SECS",
                scheduler_defaults.ready_window,
            )?,
        };

        let config = Self {
            service_name: env_or("SERVICE_NAME", default_service_name())?,
            environment: env_or("APP_ENV", default_environment())?,
            store,
            rate_limit,
            scheduler,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.rate_limit.validate()
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| MonitorError::Config(format!("invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

fn env_secs_or(name: &str, default: Duration) -> Result<Duration> {
    env_or(name, default.as_secs()).map(Duration::from_secs)
}

// Helper module to serialize/deserialize Duration with serde
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
