//! Durable render job scheduler.
//!
//! This crate provides:
//! - A `JobStore` abstraction with Redis Streams and in-memory backends
//! - At-least-once dispatch with stale-lease reclaim
//! - Retry with exponential backoff and a bounded attempt budget
//! - Lifecycle events over a broadcast channel

pub mod config;
pub mod error;
pub mod job;
pub mod memory_store;
pub mod redis_store;
pub mod retry;
pub mod scheduler;
pub mod store;

pub use config::{QueueBackend, QueueConfig};
pub use error::{QueueError, QueueResult};
pub use job::{ClaimedJob, QueueStats, QueuedJob, RetainedJob, Retention};
pub use memory_store::MemoryJobStore;
pub use redis_store::RedisJobStore;
pub use retry::RetryPolicy;
pub use scheduler::{AttemptOutcome, JobEvent, Reclaimed, Scheduler};
pub use store::JobStore;
