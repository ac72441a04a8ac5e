//! Job store on Redis Streams.
//!
//! Layout under the configured prefix `p`:
//! - `p:jobs`: ready stream drained by a consumer group; claimed entries stay
//!   in the group's pending list until released
//! - `p:delayed`: sorted set of jobs waiting out a backoff, scored by the
//!   epoch millisecond they become ready
//! - `p:attempts`: hash of delivery counts per job key
//! - `p:completed` / `p:failed`: capped streams of finished job records
//! - `p:dedup:<key>`: reservation against enqueuing the same key twice

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamPendingReply, StreamReadReply,
};
use redis::{AsyncCommands, Script};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::job::{ClaimedJob, QueueStats, QueuedJob, RetainedJob, Retention};
use crate::store::JobStore;

/// Max delayed jobs moved per promotion pass.
const PROMOTE_BATCH: usize = 100;

/// Moves one delayed member onto the ready stream. Whoever still finds the
/// member owns the promotion; the XADD and ZREM happen in one step so a job
/// is never in neither place.
const PROMOTE_SCRIPT: &str = r#"
if redis.call('ZSCORE', KEYS[1], ARGV[1]) then
    redis.call('XADD', KEYS[2], '*', 'job', ARGV[1], 'key', ARGV[2])
    redis.call('ZREM', KEYS[1], ARGV[1])
    return 1
end
return 0
"#;

/// Max stale jobs taken over per reclaim pass.
const RECLAIM_BATCH: usize = 10;

/// Redis-backed [`JobStore`].
pub struct RedisJobStore {
    client: redis::Client,
    conn: OnceCell<MultiplexedConnection>,
    group: String,
    ready_key: String,
    delayed_key: String,
    attempts_key: String,
    completed_key: String,
    failed_key: String,
    dedup_prefix: String,
    dedup_ttl: Duration,
    retention: Retention,
}

impl RedisJobStore {
    pub fn new(config: &QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let p = &config.key_prefix;

        Ok(Self {
            client,
            conn: OnceCell::new(),
            group: config.consumer_group.clone(),
            ready_key: format!("{}:jobs", p),
            delayed_key: format!("{}:delayed", p),
            attempts_key: format!("{}:attempts", p),
            completed_key: format!("{}:completed", p),
            failed_key: format!("{}:failed", p),
            dedup_prefix: format!("{}:dedup:", p),
            dedup_ttl: config.dedup_ttl,
            retention: config.retention,
        })
    }

    /// Connect and create the consumer group if it does not exist.
    pub async fn connect(config: &QueueConfig) -> QueueResult<Self> {
        let store = Self::new(config)?;
        store.init().await?;
        Ok(store)
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.ready_key)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    async fn connection(&self) -> QueueResult<MultiplexedConnection> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                self.client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(|e| QueueError::connection_failed(e.to_string()))
            })
            .await?;
        Ok(conn.clone())
    }

    fn dedup_key(&self, job: &QueuedJob) -> String {
        format!("{}{}", self.dedup_prefix, job.key())
    }

    /// Parse a stream entry; malformed entries are dropped from the stream.
    async fn decode_entry(
        &self,
        conn: &mut MultiplexedConnection,
        entry: &StreamId,
    ) -> QueueResult<Option<QueuedJob>> {
        let parsed = entry
            .get::<String>("job")
            .map(|payload| serde_json::from_str::<QueuedJob>(&payload));

        match parsed {
            Some(Ok(job)) => Ok(Some(job)),
            Some(Err(e)) => {
                warn!(message_id = %entry.id, "Failed to parse job payload: {}", e);
                self.drop_entry(conn, &entry.id).await?;
                Ok(None)
            }
            None => {
                warn!(message_id = %entry.id, "Stream entry has no job payload");
                self.drop_entry(conn, &entry.id).await?;
                Ok(None)
            }
        }
    }

    async fn drop_entry(&self, conn: &mut MultiplexedConnection, id: &str) -> QueueResult<()> {
        redis::pipe()
            .atomic()
            .cmd("XACK")
            .arg(&self.ready_key)
            .arg(&self.group)
            .arg(id)
            .ignore()
            .cmd("XDEL")
            .arg(&self.ready_key)
            .arg(id)
            .ignore()
            .query_async::<()>(conn)
            .await?;
        Ok(())
    }

    /// Count this delivery and hand out the lease.
    async fn lease(
        &self,
        conn: &mut MultiplexedConnection,
        consumer: &str,
        id: &str,
        mut job: QueuedJob,
    ) -> QueueResult<ClaimedJob> {
        let attempts: u32 = conn
            .hincr(&self.attempts_key, job.key().as_str(), 1)
            .await?;
        job.attempts = attempts;

        Ok(ClaimedJob {
            receipt: id.to_string(),
            consumer: consumer.to_string(),
            job,
        })
    }

    /// Fail unless the entry is still pending for the claiming consumer.
    async fn ensure_owned(
        &self,
        conn: &mut MultiplexedConnection,
        claimed: &ClaimedJob,
    ) -> QueueResult<()> {
        let owned: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.ready_key)
            .arg(&self.group)
            .arg(&claimed.receipt)
            .arg(&claimed.receipt)
            .arg(1)
            .arg(&claimed.consumer)
            .query_async(conn)
            .await?;

        if owned.ids.is_empty() {
            Err(QueueError::NotClaimed(claimed.receipt.clone()))
        } else {
            Ok(())
        }
    }

    fn record_fields(record: &RetainedJob) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("key", record.key.to_string()),
            ("record_id", record.record_id.clone()),
            ("state", record.state.to_string()),
            ("attempts", record.attempts.to_string()),
            ("finished_at", record.finished_at.to_rfc3339()),
        ];
        if let Some(error) = &record.error {
            fields.push(("error", error.clone()));
        }
        fields
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn push(&self, job: &QueuedJob) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job)?;

        // Reserve the key first so concurrent duplicates lose.
        let reserved: Option<String> = redis::cmd("SET")
            .arg(self.dedup_key(job))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.dedup_ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        if reserved.is_none() {
            warn!(job_key = %job.key(), "Duplicate job rejected");
            return Err(QueueError::Duplicate(job.key().clone()));
        }

        let message_id: String = redis::cmd("XADD")
            .arg(&self.ready_key)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("key")
            .arg(job.key().as_str())
            .query_async(&mut conn)
            .await?;

        debug!(job_key = %job.key(), message_id = %message_id, "Added job to stream");
        Ok(())
    }

    async fn claim(&self, consumer: &str, block: Duration) -> QueueResult<Option<ClaimedJob>> {
        // Blocking reads get their own connection so they never stall others.
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(block.as_millis().max(1) as u64)
            .arg("STREAMS")
            .arg(&self.ready_key)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let Some(reply) = reply else {
            return Ok(None);
        };

        for stream in reply.keys {
            for entry in stream.ids {
                if let Some(job) = self.decode_entry(&mut conn, &entry).await? {
                    return self.lease(&mut conn, consumer, &entry.id, job).await.map(Some);
                }
            }
        }

        Ok(None)
    }

    async fn complete(&self, claimed: &ClaimedJob) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        self.ensure_owned(&mut conn, claimed).await?;

        let record = RetainedJob::from_job(&claimed.job, None);

        redis::pipe()
            .atomic()
            .cmd("XADD")
            .arg(&self.completed_key)
            .arg("MAXLEN")
            .arg("=")
            .arg(self.retention.completed)
            .arg("*")
            .arg(Self::record_fields(&record))
            .ignore()
            .cmd("XACK")
            .arg(&self.ready_key)
            .arg(&self.group)
            .arg(&claimed.receipt)
            .ignore()
            .cmd("XDEL")
            .arg(&self.ready_key)
            .arg(&claimed.receipt)
            .ignore()
            .cmd("HDEL")
            .arg(&self.attempts_key)
            .arg(claimed.key().as_str())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn retry_later(
        &self,
        claimed: &ClaimedJob,
        job: &QueuedJob,
        delay: Duration,
    ) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        self.ensure_owned(&mut conn, claimed).await?;

        let payload = serde_json::to_string(job)?;
        let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(&self.delayed_key)
            .arg(ready_at)
            .arg(&payload)
            .ignore()
            .cmd("XACK")
            .arg(&self.ready_key)
            .arg(&self.group)
            .arg(&claimed.receipt)
            .ignore()
            .cmd("XDEL")
            .arg(&self.ready_key)
            .arg(&claimed.receipt)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn fail(&self, claimed: &ClaimedJob, job: &QueuedJob, error: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        self.ensure_owned(&mut conn, claimed).await?;

        let record = RetainedJob::from_job(job, Some(error));

        redis::pipe()
            .atomic()
            .cmd("XADD")
            .arg(&self.failed_key)
            .arg("MAXLEN")
            .arg("=")
            .arg(self.retention.failed)
            .arg("*")
            .arg(Self::record_fields(&record))
            .ignore()
            .cmd("XACK")
            .arg(&self.ready_key)
            .arg(&self.group)
            .arg(&claimed.receipt)
            .ignore()
            .cmd("XDEL")
            .arg(&self.ready_key)
            .arg(&claimed.receipt)
            .ignore()
            .cmd("HDEL")
            .arg(&self.attempts_key)
            .arg(claimed.key().as_str())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn promote_due(&self) -> QueueResult<usize> {
        let mut conn = self.connection().await?;
        let now = Utc::now().timestamp_millis();

        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.delayed_key)
            .arg("-inf")
            .arg(now)
            .arg("LIMIT")
            .arg(0)
            .arg(PROMOTE_BATCH)
            .query_async(&mut conn)
            .await?;

        let mut promoted = 0;
        for payload in due {
            let key = serde_json::from_str::<QueuedJob>(&payload)
                .map(|job| job.key().to_string())
                .unwrap_or_default();

            let moved: i64 = Script::new(PROMOTE_SCRIPT)
                .key(&self.delayed_key)
                .key(&self.ready_key)
                .arg(&payload)
                .arg(&key)
                .invoke_async(&mut conn)
                .await?;
            promoted += moved as usize;
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
        let mut conn = self.connection().await?;
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.ready_key)
            .arg(&self.group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(RECLAIM_BATCH)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = pending.ids.iter().map(|p| p.id.clone()).collect();
        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.ready_key)
            .arg(&self.group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg(&ids)
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::with_capacity(claimed.ids.len());
        for entry in claimed.ids {
            if let Some(job) = self.decode_entry(&mut conn, &entry).await? {
                info!(job_key = %job.key(), message_id = %entry.id, "Claimed stale job");
                jobs.push(self.lease(&mut conn, consumer, &entry.id, job).await?);
            }
        }

        Ok(jobs)
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let mut conn = self.connection().await?;

        let pending: StreamPendingReply = redis::cmd("XPENDING")
            .arg(&self.ready_key)
            .arg(&self.group)
            .query_async(&mut conn)
            .await?;
        let stream_len: u64 = conn.xlen(&self.ready_key).await?;
        let delayed: u64 = conn.zcard(&self.delayed_key).await?;
        let completed: u64 = conn.xlen(&self.completed_key).await?;
        let failed: u64 = conn.xlen(&self.failed_key).await?;

        let active = pending.count() as u64;
        Ok(QueueStats {
            queued: stream_len.saturating_sub(active),
            delayed,
            active,
            completed,
            failed,
        })
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
