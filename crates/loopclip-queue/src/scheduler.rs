//! Job scheduler: enqueue, dispatch, retry with backoff, terminal failure.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use loopclip_models::{JobDescriptor, JobKey};

use crate::config::{QueueBackend, QueueConfig};
use crate::error::QueueResult;
use crate::job::{ClaimedJob, QueueStats, QueuedJob};
use crate::memory_store::MemoryJobStore;
use crate::redis_store::RedisJobStore;
use crate::retry::RetryPolicy;
use crate::store::JobStore;

const EVENT_CAPACITY: usize = 256;

/// Lifecycle notifications published by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Enqueued {
        key: JobKey,
        record_id: String,
    },
    Started {
        key: JobKey,
        attempt: u32,
    },
    Completed {
        key: JobKey,
        attempts: u32,
    },
    Retrying {
        key: JobKey,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    Failed {
        key: JobKey,
        record_id: String,
        attempts: u32,
        error: String,
    },
    Reclaimed {
        key: JobKey,
        attempt: u32,
    },
}

impl JobEvent {
    pub fn key(&self) -> &JobKey {
        match self {
            JobEvent::Enqueued { key, .. }
            | JobEvent::Started { key, .. }
            | JobEvent::Completed { key, .. }
            | JobEvent::Retrying { key, .. }
            | JobEvent::Failed { key, .. }
            | JobEvent::Reclaimed { key, .. } => key,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Enqueued { .. } => "enqueued",
            JobEvent::Started { .. } => "started",
            JobEvent::Completed { .. } => "completed",
            JobEvent::Retrying { .. } => "retrying",
            JobEvent::Failed { .. } => "failed",
            JobEvent::Reclaimed { .. } => "reclaimed",
        }
    }
}

/// What happened to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Back in the queue after `delay`
    Retrying { attempt: u32, delay: Duration },
    /// Budget spent; the job is terminal
    Failed { attempts: u32 },
}

impl AttemptOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptOutcome::Failed { .. })
    }
}

/// Result of a reclaim pass.
#[derive(Debug, Default)]
pub struct Reclaimed {
    /// Taken over by the reclaiming consumer, to be run
    pub runnable: Vec<ClaimedJob>,
    /// Failed terminally because the stalled delivery was the last attempt
    pub exhausted: Vec<QueuedJob>,
}

/// Durable at-least-once work queue keyed by job key.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    policy: RetryPolicy,
    events: broadcast::Sender<JobEvent>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn JobStore>, policy: RetryPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            policy,
            events,
        }
    }

    /// Build the store named by the config and wrap it.
    pub async fn from_config(config: &QueueConfig) -> QueueResult<Self> {
        let store: Arc<dyn JobStore> = match config.backend {
            QueueBackend::Redis => Arc::new(RedisJobStore::connect(config).await?),
            QueueBackend::Memory => Arc::new(MemoryJobStore::new(config.retention)),
        };
        info!(backend = store.backend(), "Job scheduler ready");
        Ok(Self::new(store, config.retry))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Observe lifecycle events. Slow receivers lose the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Accept a job; it becomes `Queued`.
    pub async fn enqueue(&self, descriptor: JobDescriptor) -> QueueResult<JobKey> {
        let job = QueuedJob::new(descriptor);
        let key = job.key().clone();
        let record_id = job.descriptor.record_id.clone();

        self.store.push(&job).await?;

        metrics::counter!("loopclip_jobs_enqueued_total").increment(1);
        info!(job_key = %key, record_id = %record_id, "Enqueued job");
        self.emit(JobEvent::Enqueued {
            key: key.clone(),
            record_id,
        });
        Ok(key)
    }

    /// Claim the next ready job; it becomes `Active` for `consumer`.
    pub async fn next_job(
        &self,
        consumer: &str,
        block: Duration,
    ) -> QueueResult<Option<ClaimedJob>> {
        let claimed = self.store.claim(consumer, block).await?;

        if let Some(claimed) = &claimed {
            debug!(job_key = %claimed.key(), attempt = claimed.attempt(), consumer, "Claimed job");
            self.emit(JobEvent::Started {
                key: claimed.key().clone(),
                attempt: claimed.attempt(),
            });
        }
        Ok(claimed)
    }

    /// Mark a claimed job `Completed`.
    pub async fn complete(&self, claimed: &ClaimedJob) -> QueueResult<()> {
        self.store.complete(claimed).await?;

        metrics::counter!("loopclip_jobs_completed_total").increment(1);
        self.emit(JobEvent::Completed {
            key: claimed.key().clone(),
            attempts: claimed.attempt(),
        });
        Ok(())
    }

    /// Record a failed attempt and either requeue with backoff or fail terminally.
    ///
    /// `rendered` marks that the artifact already exists, so the next attempt
    /// only needs to notify.
    pub async fn fail_attempt(
        &self,
        claimed: &ClaimedJob,
        error: &str,
        rendered: bool,
    ) -> QueueResult<AttemptOutcome> {
        let attempt = claimed.attempt();
        let mut job = claimed.job.clone();
        job.rendered |= rendered;
        job.last_error = Some(error.to_string());

        match self.policy.next_delay(attempt) {
            Some(delay) => {
                self.store.retry_later(claimed, &job, delay).await?;

                metrics::counter!("loopclip_jobs_retried_total").increment(1);
                warn!(
                    job_key = %claimed.key(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error,
                    "Attempt failed, retrying"
                );
                self.emit(JobEvent::Retrying {
                    key: claimed.key().clone(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                    error: error.to_string(),
                });
                Ok(AttemptOutcome::Retrying { attempt, delay })
            }
            None => {
                self.store.fail(claimed, &job, error).await?;

                metrics::counter!("loopclip_jobs_failed_total").increment(1);
                self.emit(JobEvent::Failed {
                    key: claimed.key().clone(),
                    record_id: job.descriptor.record_id.clone(),
                    attempts: attempt,
                    error: error.to_string(),
                });
                Ok(AttemptOutcome::Failed { attempts: attempt })
            }
        }
    }

    /// Move jobs whose backoff elapsed back to `Queued`.
    pub async fn promote_due(&self) -> QueueResult<usize> {
        self.store.promote_due().await
    }

    /// Take over jobs abandoned by crashed consumers.
    ///
    /// A job whose stalled delivery was already its last allowed attempt is
    /// failed here instead of being handed out again.
    pub async fn reclaim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
    ) -> QueueResult<Reclaimed> {
        let reclaimed = self.store.reclaim_stale(consumer, min_idle).await?;
        let mut outcome = Reclaimed::default();

        for claimed in reclaimed {
            if claimed.attempt() <= self.policy.max_attempts {
                metrics::counter!("loopclip_jobs_reclaimed_total").increment(1);
                self.emit(JobEvent::Reclaimed {
                    key: claimed.key().clone(),
                    attempt: claimed.attempt(),
                });
                outcome.runnable.push(claimed);
                continue;
            }

            let attempts = self.policy.max_attempts;
            let error = match claimed.job.last_error.as_deref() {
                Some(last) => format!(
                    "worker stopped responding on attempt {}; last error: {}",
                    attempts, last
                ),
                None => format!("worker stopped responding on attempt {}", attempts),
            };
            let mut job = claimed.job.clone();
            job.attempts = attempts;
            job.last_error = Some(error.clone());

            self.store.fail(&claimed, &job, &error).await?;

            metrics::counter!("loopclip_jobs_failed_total").increment(1);
            warn!(job_key = %claimed.key(), attempts, "Stalled job exhausted its attempts");
            self.emit(JobEvent::Failed {
                key: claimed.key().clone(),
                record_id: job.descriptor.record_id.clone(),
                attempts,
                error,
            });
            outcome.exhausted.push(job);
        }
        Ok(outcome)
    }

    pub async fn stats(&self) -> QueueResult<QueueStats> {
        self.store.stats().await
    }
}
