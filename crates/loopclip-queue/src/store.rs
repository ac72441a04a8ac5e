//! Storage backend abstraction for the scheduler.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueResult;
use crate::job::{ClaimedJob, QueueStats, QueuedJob};

/// Atomic claim/ack/retry primitives over a durable job store.
///
/// Every job lives in exactly one of: ready, delayed, active (claimed), or the
/// retained completed/failed records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job into the ready set. Fails with
    /// [`QueueError::Duplicate`](crate::QueueError::Duplicate) while a job with
    /// the same key is still queued or running.
    async fn push(&self, job: &QueuedJob) -> QueueResult<()>;

    /// Claim the next ready job for `consumer`, waiting up to `block`.
    ///
    /// The returned job's `attempts` already counts this delivery.
    async fn claim(&self, consumer: &str, block: Duration) -> QueueResult<Option<ClaimedJob>>;

    /// Release a claimed job as completed.
    async fn complete(&self, claimed: &ClaimedJob) -> QueueResult<()>;

    /// Release a claimed job into the delayed set; `job` carries the updated
    /// bookkeeping and becomes ready again after `delay`.
    async fn retry_later(
        &self,
        claimed: &ClaimedJob,
        job: &QueuedJob,
        delay: Duration,
    ) -> QueueResult<()>;

    /// Release a claimed job as terminally failed.
    async fn fail(&self, claimed: &ClaimedJob, job: &QueuedJob, error: &str) -> QueueResult<()>;

    /// Move delayed jobs whose backoff elapsed into the ready set.
    async fn promote_due(&self) -> QueueResult<usize>;

    /// Take over jobs claimed at least `min_idle` ago that were never released.
    async fn reclaim_stale(&self, consumer: &str, min_idle: Duration)
        -> QueueResult<Vec<ClaimedJob>>;

    async fn stats(&self) -> QueueResult<QueueStats>;

    /// Backend name for logs and health output.
    fn backend(&self) -> &'static str;
}
