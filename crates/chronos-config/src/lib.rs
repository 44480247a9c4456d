//! Configuration for the scheduled-notification service.
//!
//! Composed the way the rest of this system's configuration has always
//! worked: a root struct of per-component sub-structs, every field with a
//! hand-written [`Default`], loaded from an optional TOML file and then
//! overridden field-by-field from the environment.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub reconciler: ReconcilerConfig,
    pub scheduler: SchedulerConfig,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
            reconciler: ReconcilerConfig::default(),
            scheduler: SchedulerConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration the standard way: defaults, then an optional
    /// file, then environment overrides. See [`ConfigLoader`].
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// A fully-commented example document, for operators bootstrapping a
    /// new deployment.
    pub fn example_toml() -> &'static str {
        include_str!("../example.toml")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub max_header_bytes: usize,
    pub shutdown_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            read_timeout_secs: 15,
            write_timeout_secs: 15,
            max_header_bytes: 1 << 20,
            shutdown_timeout_secs: 10,
        }
    }
}

impl HttpConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// A `{attempts, baseDelay, backoffFactor}` retry strategy as it appears
/// in configuration, before being turned into a [`chronos_common::RetryPolicy`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryStrategyConfig {
    pub attempts: u32,
    pub delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryStrategyConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 100,
            backoff_factor: 2.0,
        }
    }
}

impl RetryStrategyConfig {
    pub fn to_retry_policy(self) -> chronos_common::RetryPolicy {
        chronos_common::RetryPolicy::new(
            self.attempts,
            Duration::from_millis(self.delay_ms),
            self.backoff_factor,
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub canceled_secs: u64,
    pub completed_secs: u64,
    pub failed_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            canceled_secs: 7 * 24 * 3600,
            completed_secs: 30 * 24 * 3600,
            failed_secs: 30 * 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub sslmode: String,
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    pub conn_max_lifetime_secs: u64,
    pub recover_limit: u32,
    pub retention: RetentionConfig,
    pub retry: RetryStrategyConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            user: "notify".to_string(),
            password: String::new(),
            dbname: "notify".to_string(),
            sslmode: "disable".to_string(),
            max_open_conns: 10,
            max_idle_conns: 5,
            conn_max_lifetime_secs: 300,
            recover_limit: 1000,
            retention: RetentionConfig::default(),
            retry: RetryStrategyConfig::default(),
        }
    }
}

impl StorageConfig {
    pub fn dsn(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.dbname, self.sslmode
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub max_memory: String,
    pub policy: String,
    pub expiration_time_secs: u64,
    pub retry: RetryStrategyConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: String::new(),
            max_memory: "256mb".to_string(),
            policy: "allkeys-lru".to_string(),
            expiration_time_secs: 120,
            retry: RetryStrategyConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}", self.host, self.port)
        } else {
            format!("redis://:{}@{}:{}", self.password, self.host, self.port)
        }
    }

    pub fn expiration_time(&self) -> Duration {
        Duration::from_secs(self.expiration_time_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub retry: RetryStrategyConfig,
    /// Extra grace period added to the per-id queue's own `x-expires`
    /// beyond its `x-message-ttl`, so the auto-delete timer never races
    /// the dead-letter delivery.
    pub message_queue_ttl_grace_secs: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            retry: RetryStrategyConfig::default(),
            message_queue_ttl_grace_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub workers: u32,
    pub prefetch: u16,
    pub retry: RetryStrategyConfig,
    pub auto_ack: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            prefetch: 10,
            retry: RetryStrategyConfig::default(),
            auto_ack: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub amqp_url: String,
    pub exchange_name: String,
    pub main_queue_name: String,
    pub producer: ProducerConfig,
    pub consumer: ConsumerConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            amqp_url: "amqp://127.0.0.1:5672/%2f".to_string(),
            exchange_name: "notify.main".to_string(),
            main_queue_name: "notify.main".to_string(),
            producer: ProducerConfig::default(),
            consumer: ConsumerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub cleanup_interval_secs: u64,
    pub healthcheck_interval_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: 600,
            healthcheck_interval_secs: 10,
        }
    }
}

impl ReconcilerConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn healthcheck_interval(&self) -> Duration {
        Duration::from_secs(self.healthcheck_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub urgent_window_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            urgent_window_secs: 3600,
        }
    }
}

impl SchedulerConfig {
    pub fn urgent_window(&self) -> Duration {
        Duration::from_secs(self.urgent_window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: String,
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
            level: "info".to_string(),
        }
    }
}
