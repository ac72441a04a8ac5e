//! Worker configuration.

use std::time::Duration;

use crate::notifier::NotifierConfig;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// How long one poll of the queue blocks
    pub poll_block: Duration,
    /// How often due retries are moved back to the ready queue
    pub promote_interval: Duration,
    /// How often the worker should scan for orphaned jobs
    pub claim_interval: Duration,
    /// Minimum idle time before a held job can be claimed (crash recovery).
    /// Must exceed the longest possible attempt.
    pub claim_min_idle: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Fixed encoder timeout; derived from the clip duration when unset
    pub encoder_timeout: Option<Duration>,
    pub notifier: NotifierConfig,
    /// Consumer name in the queue
    pub consumer_name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            poll_block: Duration::from_secs(1),
            promote_interval: Duration::from_millis(500),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(1800),
            shutdown_timeout: Duration::from_secs(60),
            encoder_timeout: None,
            notifier: NotifierConfig::default(),
            consumer_name: default_consumer_name(),
        }
    }
}

fn default_consumer_name() -> String {
    format!("worker-{}", uuid::Uuid::new_v4().simple())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_concurrent_jobs: env_parse::<usize>("WORKER_MAX_JOBS")
                .unwrap_or(defaults.max_concurrent_jobs)
                .max(1),
            poll_block: env_parse("WORKER_POLL_BLOCK_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_block),
            promote_interval: env_parse("WORKER_PROMOTE_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.promote_interval),
            claim_interval: env_parse("WORKER_CLAIM_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_interval),
            claim_min_idle: env_parse("WORKER_CLAIM_MIN_IDLE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_min_idle),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            encoder_timeout: env_parse("WORKER_ENCODER_TIMEOUT_SECS").map(Duration::from_secs),
            notifier: NotifierConfig::from_env(),
            consumer_name: std::env::var("WORKER_NAME").unwrap_or(defaults.consumer_name),
        }
    }
}
