//! Configuration loader with file and environment variable support.

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths.
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "notify.toml",
    "./config/config.toml",
    "/etc/notify/config.toml",
];

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable
    /// overrides applied on top.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("NOTIFY_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        // HTTP
        if let Ok(val) = env::var("NOTIFY_HTTP_HOST") {
            config.http.host = val;
        }
        if let Ok(val) = env::var("NOTIFY_HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http.port = port;
            }
        }
        if let Ok(val) = env::var("NOTIFY_HTTP_SHUTDOWN_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.http.shutdown_timeout_secs = secs;
            }
        }

        // Storage
        if let Ok(val) = env::var("NOTIFY_STORAGE_HOST") {
            config.storage.host = val;
        }
        if let Ok(val) = env::var("NOTIFY_STORAGE_PORT") {
            if let Ok(port) = val.parse() {
                config.storage.port = port;
            }
        }
        if let Ok(val) = env::var("NOTIFY_STORAGE_USER") {
            config.storage.user = val;
        }
        if let Ok(val) = env::var("NOTIFY_STORAGE_PASSWORD") {
            config.storage.password = val;
        }
        if let Ok(val) = env::var("NOTIFY_STORAGE_DBNAME") {
            config.storage.dbname = val;
        }
        if let Ok(val) = env::var("NOTIFY_STORAGE_SSLMODE") {
            config.storage.sslmode = val;
        }
        if let Ok(val) = env::var("NOTIFY_STORAGE_MAX_OPEN_CONNS") {
            if let Ok(n) = val.parse() {
                config.storage.max_open_conns = n;
            }
        }
        if let Ok(val) = env::var("NOTIFY_STORAGE_RECOVER_LIMIT") {
            if let Ok(n) = val.parse() {
                config.storage.recover_limit = n;
            }
        }
        if let Ok(val) = env::var("NOTIFY_RETENTION_CANCELED_SECS") {
            if let Ok(n) = val.parse() {
                config.storage.retention.canceled_secs = n;
            }
        }
        if let Ok(val) = env::var("NOTIFY_RETENTION_COMPLETED_SECS") {
            if let Ok(n) = val.parse() {
                config.storage.retention.completed_secs = n;
            }
        }
        if let Ok(val) = env::var("NOTIFY_RETENTION_FAILED_SECS") {
            if let Ok(n) = val.parse() {
                config.storage.retention.failed_secs = n;
            }
        }

        // Cache
        if let Ok(val) = env::var("NOTIFY_CACHE_HOST") {
            config.cache.host = val;
        }
        if let Ok(val) = env::var("NOTIFY_CACHE_PORT") {
            if let Ok(port) = val.parse() {
                config.cache.port = port;
            }
        }
        if let Ok(val) = env::var("NOTIFY_CACHE_PASSWORD") {
            config.cache.password = val;
        }
        if let Ok(val) = env::var("NOTIFY_CACHE_EXPIRATION_TIME_SECS") {
            if let Ok(n) = val.parse() {
                config.cache.expiration_time_secs = n;
            }
        }

        // Queue
        if let Ok(val) = env::var("NOTIFY_QUEUE_AMQP_URL") {
            config.queue.amqp_url = val;
        }
        if let Ok(val) = env::var("NOTIFY_QUEUE_EXCHANGE_NAME") {
            config.queue.exchange_name = val;
        }
        if let Ok(val) = env::var("NOTIFY_QUEUE_MAIN_QUEUE_NAME") {
            config.queue.main_queue_name = val;
        }
        if let Ok(val) = env::var("NOTIFY_QUEUE_CONSUMER_WORKERS") {
            if let Ok(n) = val.parse() {
                config.queue.consumer.workers = n;
            }
        }
        if let Ok(val) = env::var("NOTIFY_QUEUE_CONSUMER_PREFETCH") {
            if let Ok(n) = val.parse() {
                config.queue.consumer.prefetch = n;
            }
        }
        if let Ok(val) = env::var("NOTIFY_QUEUE_CONSUMER_AUTO_ACK") {
            config.queue.consumer.auto_ack = val.parse().unwrap_or(false);
        }

        // Reconciler
        if let Ok(val) = env::var("NOTIFY_RECONCILER_CLEANUP_INTERVAL_SECS") {
            if let Ok(n) = val.parse() {
                config.reconciler.cleanup_interval_secs = n;
            }
        }
        if let Ok(val) = env::var("NOTIFY_RECONCILER_HEALTHCHECK_INTERVAL_SECS") {
            if let Ok(n) = val.parse() {
                config.reconciler.healthcheck_interval_secs = n;
            }
        }

        // Scheduler
        if let Ok(val) = env::var("NOTIFY_SCHEDULER_URGENT_WINDOW_SECS") {
            if let Ok(n) = val.parse() {
                config.scheduler.urgent_window_secs = n;
            }
        }

        // Logging
        if let Ok(val) = env::var("LOG_FORMAT") {
            config.log.format = val;
        }
        if let Ok(val) = env::var("NOTIFY_LOG_LEVEL") {
            config.log.level = val;
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
