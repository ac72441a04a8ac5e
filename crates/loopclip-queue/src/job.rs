//! Queue envelope around a job descriptor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use loopclip_models::{JobDescriptor, JobKey, JobState};

/// A job as stored in the queue.
///
/// The descriptor never changes after enqueue; only the bookkeeping around it
/// does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub descriptor: JobDescriptor,
    /// Attempts started so far, including the one in progress
    #[serde(default)]
    pub attempts: u32,
    /// The artifact was rendered by an earlier attempt; only notification is left
    #[serde(default)]
    pub rendered: bool,
    #[serde(default)]
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedJob {
    pub fn new(descriptor: JobDescriptor) -> Self {
        Self {
            descriptor,
            attempts: 0,
            rendered: false,
            last_error: None,
            enqueued_at: Utc::now(),
        }
    }

    pub fn key(&self) -> &JobKey {
        &self.descriptor.key
    }
}

/// A job leased to one consumer.
///
/// The receipt identifies the delivery in the backing store and must be
/// handed back on completion, retry or failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedJob {
    pub receipt: String,
    pub consumer: String,
    pub job: QueuedJob,
}

impl ClaimedJob {
    pub fn key(&self) -> &JobKey {
        self.job.key()
    }

    /// 1-based number of the attempt this lease represents.
    pub fn attempt(&self) -> u32 {
        self.job.attempts
    }
}

/// Short-lived record of a finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetainedJob {
    pub key: JobKey,
    pub record_id: String,
    pub state: JobState,
    pub attempts: u32,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl RetainedJob {
    pub fn from_job(job: &QueuedJob, error: Option<&str>) -> Self {
        Self {
            key: job.key().clone(),
            record_id: job.descriptor.record_id.clone(),
            state: if error.is_some() {
                JobState::Failed
            } else {
                JobState::Completed
            },
            attempts: job.attempts,
            error: error.map(str::to_string),
            finished_at: Utc::now(),
        }
    }
}

/// Queue depth snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Ready for a worker
    pub queued: u64,
    /// Waiting out a retry backoff
    pub delayed: u64,
    /// Held by a worker
    pub active: u64,
    /// Retained completed records
    pub completed: u64,
    /// Retained failed records
    pub failed: u64,
}

/// How many finished records to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub completed: usize,
    pub failed: usize,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            completed: 100,
            failed: 500,
        }
    }
}
