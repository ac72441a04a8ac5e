//! Queue configuration.

use std::str::FromStr;
use std::time::Duration;

use crate::error::QueueError;
use crate::job::Retention;
use crate::retry::RetryPolicy;

/// Which store backs the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueBackend {
    #[default]
    Redis,
    /// In-process store; only usable when the worker runs in the same process
    Memory,
}

impl FromStr for QueueBackend {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(QueueError::Config(format!("unknown queue backend: {}", other))),
        }
    }
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    /// Redis URL
    pub redis_url: String,
    /// Prefix of every Redis key
    pub key_prefix: String,
    /// Consumer group name
    pub consumer_group: String,
    pub retention: Retention,
    pub retry: RetryPolicy,
    /// How long an enqueued key stays reserved against duplicates
    pub dedup_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Redis,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "loopclip".to_string(),
            consumer_group: "loopclip:workers".to_string(),
            retention: Retention::default(),
            retry: RetryPolicy::default(),
            dedup_ttl: Duration::from_secs(86400),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, QueueError> {
        let defaults = Self::default();

        let backend = match std::env::var("QUEUE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.backend,
        };

        Ok(Self {
            backend,
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            key_prefix: std::env::var("QUEUE_PREFIX").unwrap_or(defaults.key_prefix),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            retention: Retention {
                completed: env_parse("QUEUE_KEEP_COMPLETED").unwrap_or(defaults.retention.completed),
                failed: env_parse("QUEUE_KEEP_FAILED").unwrap_or(defaults.retention.failed),
            },
            retry: RetryPolicy::default()
                .with_max_attempts(
                    env_parse("QUEUE_MAX_ATTEMPTS").unwrap_or(defaults.retry.max_attempts),
                )
                .with_base_delay(
                    env_parse("QUEUE_BACKOFF_MS")
                        .map(Duration::from_millis)
                        .unwrap_or(defaults.retry.base_delay),
                ),
            dedup_ttl: env_parse("QUEUE_DEDUP_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.dedup_ttl),
        })
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parsing() {
        assert_eq!("redis".parse::<QueueBackend>().unwrap(), QueueBackend::Redis);
        assert_eq!(" Memory ".parse::<QueueBackend>().unwrap(), QueueBackend::Memory);
        assert!("kafka".parse::<QueueBackend>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(2));
        assert_eq!(config.retention.completed, 100);
        assert_eq!(config.retention.failed, 500);
    }
}
