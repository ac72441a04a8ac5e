//! In-process job store.
//!
//! Used by tests and by the single-process deployment where the worker runs
//! inside the API. Nothing survives a restart.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

use loopclip_models::JobKey;

use crate::error::{QueueError, QueueResult};
use crate::job::{ClaimedJob, QueueStats, QueuedJob, RetainedJob, Retention};
use crate::store::JobStore;

struct Lease {
    consumer: String,
    claimed_at: Instant,
    job: QueuedJob,
}

#[derive(Default)]
struct Inner {
    ready: VecDeque<QueuedJob>,
    delayed: Vec<(Instant, QueuedJob)>,
    active: HashMap<String, Lease>,
    completed: VecDeque<RetainedJob>,
    failed: VecDeque<RetainedJob>,
    /// Keys of jobs not yet completed or failed
    seen: HashSet<JobKey>,
    next_receipt: u64,
}

impl Inner {
    fn lease(&mut self, consumer: &str, mut job: QueuedJob) -> ClaimedJob {
        self.next_receipt += 1;
        let receipt = format!("mem-{}", self.next_receipt);
        job.attempts += 1;

        self.active.insert(
            receipt.clone(),
            Lease {
                consumer: consumer.to_string(),
                claimed_at: Instant::now(),
                job: job.clone(),
            },
        );

        ClaimedJob {
            receipt,
            consumer: consumer.to_string(),
            job,
        }
    }

    fn release(&mut self, claimed: &ClaimedJob) -> QueueResult<Lease> {
        match self.active.get(&claimed.receipt) {
            Some(lease) if lease.consumer == claimed.consumer => {}
            _ => return Err(QueueError::NotClaimed(claimed.receipt.clone())),
        }
        self.active
            .remove(&claimed.receipt)
            .ok_or_else(|| QueueError::NotClaimed(claimed.receipt.clone()))
    }
}

fn retain(records: &mut VecDeque<RetainedJob>, record: RetainedJob, limit: usize) {
    records.push_back(record);
    while records.len() > limit {
        records.pop_front();
    }
}

/// Job store held entirely in memory.
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
    notify: Notify,
    retention: Retention,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new(Retention::default())
    }
}

impl MemoryJobStore {
    pub fn new(retention: Retention) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            retention,
        }
    }

    /// Retained completed records, oldest first.
    pub async fn completed(&self) -> Vec<RetainedJob> {
        self.inner.lock().await.completed.iter().cloned().collect()
    }

    /// Retained failed records, oldest first.
    pub async fn failed(&self) -> Vec<RetainedJob> {
        self.inner.lock().await.failed.iter().cloned().collect()
    }

    async fn try_claim(&self, consumer: &str) -> Option<ClaimedJob> {
        let mut inner = self.inner.lock().await;
        let job = inner.ready.pop_front()?;
        Some(inner.lease(consumer, job))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn push(&self, job: &QueuedJob) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        if !inner.seen.insert(job.key().clone()) {
            return Err(QueueError::Duplicate(job.key().clone()));
        }
        inner.ready.push_back(job.clone());
        drop(inner);

        self.notify.notify_one();
        Ok(())
    }

    async fn claim(&self, consumer: &str, block: Duration) -> QueueResult<Option<ClaimedJob>> {
        let deadline = Instant::now() + block;

        loop {
            if let Some(claimed) = self.try_claim(consumer).await {
                return Ok(Some(claimed));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn complete(&self, claimed: &ClaimedJob) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let lease = inner.release(claimed)?;
        inner.seen.remove(lease.job.key());
        let limit = self.retention.completed;
        retain(&mut inner.completed, RetainedJob::from_job(&lease.job, None), limit);
        Ok(())
    }

    async fn retry_later(
        &self,
        claimed: &ClaimedJob,
        job: &QueuedJob,
        delay: Duration,
    ) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner.release(claimed)?;
        inner.delayed.push((Instant::now() + delay, job.clone()));
        Ok(())
    }

    async fn fail(&self, claimed: &ClaimedJob, job: &QueuedJob, error: &str) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner.release(claimed)?;
        inner.seen.remove(job.key());
        let limit = self.retention.failed;
        retain(&mut inner.failed, RetainedJob::from_job(job, Some(error)), limit);
        Ok(())
    }

    async fn promote_due(&self) -> QueueResult<usize> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.delayed)
            .into_iter()
            .partition(|(ready_at, _)| *ready_at <= now);
        inner.delayed = waiting;

        let promoted = due.len();
        inner.ready.extend(due.into_iter().map(|(_, job)| job));
        drop(inner);

        for _ in 0..promoted {
            self.notify.notify_one();
        }
        if promoted > 0 {
            debug!(promoted, "Promoted delayed jobs");
        }
        Ok(promoted)
    }

    async fn reclaim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
    ) -> QueueResult<Vec<ClaimedJob>> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        let mut stale: Vec<String> = inner
            .active
            .iter()
            .filter(|(_, lease)| now.duration_since(lease.claimed_at) >= min_idle)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        stale.sort();

        let mut reclaimed = Vec::with_capacity(stale.len());
        for receipt in stale {
            if let Some(lease) = inner.active.remove(&receipt) {
                reclaimed.push(inner.lease(consumer, lease.job));
            }
        }
        Ok(reclaimed)
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let inner = self.inner.lock().await;
        Ok(QueueStats {
            queued: inner.ready.len() as u64,
            delayed: inner.delayed.len() as u64,
            active: inner.active.len() as u64,
            completed: inner.completed.len() as u64,
            failed: inner.failed.len() as u64,
        })
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::descriptor;
    use loopclip_models::JobState;

    #[tokio::test]
    async fn test_push_and_claim() {
        let store = MemoryJobStore::default();
        store.push(&QueuedJob::new(descriptor("a.mp4"))).await.unwrap();

        let claimed = store
            .claim("w1", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.key().as_str(), "a.mp4");
        assert_eq!(claimed.attempt(), 1);

        let stats = store.stats().await.unwrap();
        assert_eq!((stats.queued, stats.active), (0, 1));
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected() {
        let store = MemoryJobStore::default();
        store.push(&QueuedJob::new(descriptor("a.mp4"))).await.unwrap();

        let err = store
            .push(&QueuedJob::new(descriptor("a.mp4")))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Duplicate(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_times_out_when_empty() {
        let store = MemoryJobStore::default();
        let claimed = store.claim("w1", Duration::from_secs(1)).await.unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn test_claim_wakes_on_push() {
        let store = std::sync::Arc::new(MemoryJobStore::default());
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.claim("w1", Duration::from_secs(5)).await })
        };

        tokio::task::yield_now().await;
        store.push(&QueuedJob::new(descriptor("a.mp4"))).await.unwrap();

        let claimed = waiter.await.unwrap().unwrap();
        assert!(claimed.is_some());
    }

    #[tokio::test]
    async fn test_release_requires_lease() {
        let store = MemoryJobStore::default();
        store.push(&QueuedJob::new(descriptor("a.mp4"))).await.unwrap();
        let claimed = store.claim("w1", Duration::ZERO).await.unwrap().unwrap();

        store.complete(&claimed).await.unwrap();
        let err = store.complete(&claimed).await.unwrap_err();
        assert!(matches!(err, QueueError::NotClaimed(_)));
    }

    #[tokio::test]
    async fn test_retention_is_bounded() {
        let store = MemoryJobStore::new(Retention {
            completed: 2,
            failed: 1,
        });

        for i in 0..4 {
            let key = format!("{}.mp4", i);
            store.push(&QueuedJob::new(descriptor(&key))).await.unwrap();
            let claimed = store.claim("w1", Duration::ZERO).await.unwrap().unwrap();
            if i % 2 == 0 {
                store.complete(&claimed).await.unwrap();
            } else {
                let job = claimed.job.clone();
                store.fail(&claimed, &job, "boom").await.unwrap();
            }
        }

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
        let failed = store.failed().await;
        assert_eq!(failed[0].key.as_str(), "3.mp4");
        assert_eq!(failed[0].state, JobState::Failed);
        assert_eq!(failed[0].error.as_deref(), Some("boom"));
        assert!(store
            .completed()
            .await
            .iter()
            .all(|r| r.state == JobState::Completed && r.error.is_none()));
    }

    #[tokio::test]
    async fn test_finished_keys_are_forgotten() {
        let store = MemoryJobStore::default();
        for key in ["a.mp4", "b.mp4"] {
            store.push(&QueuedJob::new(descriptor(key))).await.unwrap();
        }
        assert_eq!(store.inner.lock().await.seen.len(), 2);

        let done = store.claim("w1", Duration::ZERO).await.unwrap().unwrap();
        store.complete(&done).await.unwrap();
        let failed = store.claim("w1", Duration::ZERO).await.unwrap().unwrap();
        let job = failed.job.clone();
        store.fail(&failed, &job, "boom").await.unwrap();

        assert!(store.inner.lock().await.seen.is_empty());
    }

    #[tokio::test]
    async fn test_retried_job_keeps_its_key() {
        let store = MemoryJobStore::default();
        store.push(&QueuedJob::new(descriptor("a.mp4"))).await.unwrap();
        let claimed = store.claim("w1", Duration::ZERO).await.unwrap().unwrap();
        let job = claimed.job.clone();
        store.retry_later(&claimed, &job, Duration::ZERO).await.unwrap();

        let err = store
            .push(&QueuedJob::new(descriptor("a.mp4")))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Duplicate(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reclaim_stale_lease() {
        let store = MemoryJobStore::default();
        store.push(&QueuedJob::new(descriptor("a.mp4"))).await.unwrap();
        let first = store.claim("crashed", Duration::ZERO).await.unwrap().unwrap();

        assert!(store
            .reclaim_stale("w2", Duration::from_secs(60))
            .await
            .unwrap()
            .is_empty());

        tokio::time::advance(Duration::from_secs(61)).await;
        let reclaimed = store
            .reclaim_stale("w2", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].consumer, "w2");
        assert_eq!(reclaimed[0].attempt(), 2);

        // The crashed consumer's receipt is no longer valid
        tokio_test::assert_err!(store.complete(&first).await);
        store.complete(&reclaimed[0]).await.unwrap();
    }
}
