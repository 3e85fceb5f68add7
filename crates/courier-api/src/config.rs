//! Configuration management for the courier service.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use courier_delivery::{
    client::ClientConfig,
    queue::RedisQueueConfig,
    retry::{BackoffStrategy, RetryPolicy},
    DispatcherConfig,
};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "courier.toml";

/// Queue implementation selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// Durable Redis list.
    Redis,
    /// Bounded in-process channel; contents are lost on restart.
    Memory,
}

impl std::fmt::Display for QueueBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Redis => write!(f, "redis"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Complete service configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`courier.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// # Example
///
/// ```no_run
/// use courier_api::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
///
/// println!("Server will bind to {}:{}", config.host, config.port);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server
    /// Server bind address.
    ///
    /// Environment variable: `HOST`
    #[serde(default = "default_host", alias = "HOST")]
    pub host: String,
    /// Server bind port.
    ///
    /// Environment variable: `PORT`
    #[serde(default = "default_port", alias = "PORT")]
    pub port: u16,
    /// HTTP request timeout in seconds.
    ///
    /// Environment variable: `REQUEST_TIMEOUT`
    #[serde(default = "default_request_timeout", alias = "REQUEST_TIMEOUT")]
    pub request_timeout: u64,

    // Queue
    /// Queue implementation, `redis` or `memory`.
    ///
    /// Environment variable: `QUEUE_BACKEND`
    #[serde(default = "default_queue_backend", alias = "QUEUE_BACKEND")]
    pub queue_backend: QueueBackend,
    /// Capacity of the in-memory queue.
    ///
    /// Environment variable: `MEMORY_QUEUE_CAPACITY`
    #[serde(default = "default_memory_queue_capacity", alias = "MEMORY_QUEUE_CAPACITY")]
    pub memory_queue_capacity: usize,
    /// Redis connection URL.
    ///
    /// Environment variable: `REDIS_URL`
    #[serde(default = "default_redis_url", alias = "REDIS_URL")]
    pub redis_url: String,
    /// Redis list key holding queued tasks.
    ///
    /// Environment variable: `REDIS_QUEUE_KEY`
    #[serde(default = "default_redis_queue_key", alias = "REDIS_QUEUE_KEY")]
    pub redis_queue_key: String,
    /// Pause before a Redis consumer reconnects, in milliseconds.
    ///
    /// Environment variable: `REDIS_RECONNECT_DELAY_MS`
    #[serde(default = "default_redis_reconnect_delay_ms", alias = "REDIS_RECONNECT_DELAY_MS")]
    pub redis_reconnect_delay_ms: u64,
    /// Limit on establishing a Redis connection, in milliseconds.
    ///
    /// Environment variable: `REDIS_CONNECT_TIMEOUT_MS`
    #[serde(default = "default_redis_connect_timeout_ms", alias = "REDIS_CONNECT_TIMEOUT_MS")]
    pub redis_connect_timeout_ms: u64,

    // Delivery
    /// Number of concurrent delivery workers.
    ///
    /// Environment variable: `WORKER_POOL_SIZE`
    #[serde(default = "default_worker_count", alias = "WORKER_POOL_SIZE")]
    pub worker_pool_size: usize,
    /// HTTP timeout for each delivery attempt in seconds.
    ///
    /// Environment variable: `DELIVERY_TIMEOUT_SECONDS`
    #[serde(default = "default_delivery_timeout", alias = "DELIVERY_TIMEOUT_SECONDS")]
    pub delivery_timeout_seconds: u64,
    /// Redirects a delivery may follow.
    ///
    /// Environment variable: `DELIVERY_MAX_REDIRECTS`
    #[serde(default = "default_max_redirects", alias = "DELIVERY_MAX_REDIRECTS")]
    pub delivery_max_redirects: u32,
    /// Whether target TLS certificates are verified.
    ///
    /// Environment variable: `DELIVERY_VERIFY_TLS`
    #[serde(default = "default_verify_tls", alias = "DELIVERY_VERIFY_TLS")]
    pub delivery_verify_tls: bool,
    /// Grace period for in-flight deliveries on shutdown, in seconds.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECONDS`
    #[serde(default = "default_shutdown_timeout", alias = "SHUTDOWN_TIMEOUT_SECONDS")]
    pub shutdown_timeout_seconds: u64,

    // Retry
    /// Retries granted to each new task.
    ///
    /// Environment variable: `MAX_RETRIES`
    #[serde(default = "default_max_retries", alias = "MAX_RETRIES")]
    pub max_retries: u32,
    /// Base delay for backoff in milliseconds.
    ///
    /// Environment variable: `RETRY_BASE_DELAY_MS`
    #[serde(default = "default_base_delay_ms", alias = "RETRY_BASE_DELAY_MS")]
    pub retry_base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    ///
    /// Environment variable: `RETRY_MAX_DELAY_MS`
    #[serde(default = "default_max_delay_ms", alias = "RETRY_MAX_DELAY_MS")]
    pub retry_max_delay_ms: u64,
    /// Jitter factor for retry timing (0.0 to 1.0).
    ///
    /// Environment variable: `RETRY_JITTER_FACTOR`
    #[serde(default = "default_jitter_factor", alias = "RETRY_JITTER_FACTOR")]
    pub retry_jitter_factor: f64,
    /// How delays grow between retries.
    ///
    /// Environment variable: `RETRY_BACKOFF_STRATEGY`
    #[serde(default = "default_backoff_strategy", alias = "RETRY_BACKOFF_STRATEGY")]
    pub retry_backoff_strategy: BackoffStrategy,

    // Logging
    /// Log level configuration.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Config {
    /// Load configuration from defaults, config file, and environment variable
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns error if a source holds a value of the wrong type or the
    /// merged configuration fails validation.
    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment())
    }

    /// Layered sources used by [`load`](Self::load).
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""))
    }

    /// Extracts and validates configuration from `figment`.
    ///
    /// # Errors
    ///
    /// Returns error if extraction or validation fails.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Convert to the dispatcher's configuration.
    pub fn to_dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            worker_count: self.worker_pool_size,
            client_config: self.to_client_config(),
            retry_policy: self.to_retry_policy(),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_seconds),
        }
    }

    /// Convert to client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.delivery_timeout_seconds),
            max_redirects: self.delivery_max_redirects,
            verify_tls: self.delivery_verify_tls,
            ..ClientConfig::default()
        }
    }

    /// Convert to retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter_factor: self.retry_jitter_factor,
            backoff_strategy: self.retry_backoff_strategy,
        }
    }

    /// Convert to Redis queue configuration.
    pub fn to_redis_config(&self) -> RedisQueueConfig {
        RedisQueueConfig {
            url: self.redis_url.clone(),
            key: self.redis_queue_key.clone(),
            reconnect_delay: Duration::from_millis(self.redis_reconnect_delay_ms),
            connect_timeout: Duration::from_millis(self.redis_connect_timeout_ms),
        }
    }

    /// Per-request timeout for the intake server.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Parse server socket address from host and port configuration.
    ///
    /// # Errors
    ///
    /// Returns error if host and port do not form a socket address.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr_str).context("Invalid server address")
    }

    /// Get Redis URL with password masked for logging.
    pub fn redis_url_masked(&self) -> String {
        if let Some(at_pos) = self.redis_url.rfind('@') {
            if let Some(colon_pos) = self.redis_url[..at_pos].rfind(':') {
                let scheme_end = self.redis_url.find("://").map_or(0, |pos| pos + 3);
                if colon_pos >= scheme_end {
                    let mut masked = self.redis_url.clone();
                    masked.replace_range(colon_pos + 1..at_pos, "***");
                    return masked;
                }
            }
        }
        self.redis_url.clone()
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if self.worker_pool_size == 0 {
            anyhow::bail!("worker_pool_size must be greater than 0");
        }

        if self.memory_queue_capacity == 0 {
            anyhow::bail!("memory_queue_capacity must be greater than 0");
        }

        if self.redis_queue_key.is_empty() {
            anyhow::bail!("redis_queue_key must not be empty");
        }

        if self.redis_connect_timeout_ms == 0 {
            anyhow::bail!("redis_connect_timeout_ms must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            anyhow::bail!("retry_jitter_factor must be between 0.0 and 1.0");
        }

        if self.retry_base_delay_ms == 0 {
            anyhow::bail!("retry_base_delay_ms must be greater than 0");
        }

        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            anyhow::bail!("retry_max_delay_ms cannot be less than retry_base_delay_ms");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
            queue_backend: default_queue_backend(),
            memory_queue_capacity: default_memory_queue_capacity(),
            redis_url: default_redis_url(),
            redis_queue_key: default_redis_queue_key(),
            redis_reconnect_delay_ms: default_redis_reconnect_delay_ms(),
            redis_connect_timeout_ms: default_redis_connect_timeout_ms(),
            worker_pool_size: default_worker_count(),
            delivery_timeout_seconds: default_delivery_timeout(),
            delivery_max_redirects: default_max_redirects(),
            delivery_verify_tls: default_verify_tls(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_base_delay_ms(),
            retry_max_delay_ms: default_max_delay_ms(),
            retry_jitter_factor: default_jitter_factor(),
            retry_backoff_strategy: default_backoff_strategy(),
            rust_log: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_queue_backend() -> QueueBackend {
    QueueBackend::Redis
}

fn default_memory_queue_capacity() -> usize {
    1000
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_redis_queue_key() -> String {
    courier_delivery::queue::DEFAULT_QUEUE_KEY.to_string()
}

fn default_redis_reconnect_delay_ms() -> u64 {
    1000
}

fn default_redis_connect_timeout_ms() -> u64 {
    5000
}

fn default_worker_count() -> usize {
    courier_delivery::DEFAULT_WORKER_COUNT
}

fn default_delivery_timeout() -> u64 {
    courier_delivery::DEFAULT_TIMEOUT_SECONDS
}

fn default_max_redirects() -> u32 {
    10
}

fn default_verify_tls() -> bool {
    true
}

fn default_shutdown_timeout() -> u64 {
    courier_delivery::DEFAULT_SHUTDOWN_TIMEOUT_SECONDS
}

fn default_max_retries() -> u32 {
    courier_core::DEFAULT_MAX_RETRIES
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    3_600_000
}

fn default_jitter_factor() -> f64 {
    0.0
}

fn default_backoff_strategy() -> BackoffStrategy {
    BackoffStrategy::Exponential
}

fn default_log_level() -> String {
    "info".to_string()
}
