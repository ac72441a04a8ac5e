//! Job executor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use loopclip_media::{remove_quietly, TransientFile};
use loopclip_queue::{AttemptOutcome, ClaimedJob, Reclaimed, Scheduler};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::processor::{process_job, AttemptError, ProcessingContext};
use crate::retry::FailureTracker;

/// Pause after a failed poll before trying the queue again.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Job executor that drains the scheduler.
pub struct JobExecutor {
    config: WorkerConfig,
    scheduler: Scheduler,
    ctx: Arc<ProcessingContext>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, scheduler: Scheduler, ctx: ProcessingContext) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            scheduler,
            ctx: Arc::new(ctx),
            job_semaphore,
            shutdown,
        }
    }

    /// Receiver that flips to `true` when shutdown is requested.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Run until shutdown is signalled, then wait for in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            consumer = %self.config.consumer_name,
            backend = self.scheduler.backend(),
            "Starting job executor with {} max concurrent jobs",
            self.config.max_concurrent_jobs
        );

        let promote_task = self.spawn_promoter();
        let claim_task = self.spawn_reclaimer();

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut failures = FailureTracker::new("job poll", 5);

        // Main job consumption loop
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_next() => {
                    match result {
                        Ok(()) => failures.record_success(),
                        Err(e) => {
                            if failures.record_failure() {
                                error!("Error consuming jobs: {}", e);
                            }
                            tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }

        promote_task.abort();
        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "In-flight jobs still running after {:?}; they will be reclaimed",
                self.config.shutdown_timeout
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Wait for a free slot, claim one job and hand it to a task.
    async fn consume_next(&self) -> WorkerResult<()> {
        let permit = Arc::clone(&self.job_semaphore)
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::config_error("job semaphore closed"))?;

        let claimed = self
            .scheduler
            .next_job(&self.config.consumer_name, self.config.poll_block)
            .await?;

        if let Some(claimed) = claimed {
            self.spawn_job(claimed, permit);
        }
        Ok(())
    }

    fn spawn_job(&self, claimed: ClaimedJob, permit: OwnedSemaphorePermit) {
        let scheduler = self.scheduler.clone();
        let ctx = Arc::clone(&self.ctx);

        tokio::spawn(async move {
            let _permit = permit;
            execute_job(scheduler, ctx, claimed).await;
        });
    }

    /// Moves jobs whose backoff elapsed back to the ready queue.
    fn spawn_promoter(&self) -> JoinHandle<()> {
        let scheduler = self.scheduler.clone();
        let period = self.config.promote_interval;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut failures = FailureTracker::new("retry promoter", 3);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        match scheduler.promote_due().await {
                            Ok(0) => failures.record_success(),
                            Ok(n) => {
                                failures.record_success();
                                debug!("Promoted {} delayed jobs", n);
                            }
                            Err(e) => {
                                if failures.record_failure() {
                                    warn!("Failed to promote delayed jobs: {}", e);
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    /// Periodically takes over jobs held by consumers that stopped responding.
    fn spawn_reclaimer(&self) -> JoinHandle<()> {
        let scheduler = self.scheduler.clone();
        let ctx = Arc::clone(&self.ctx);
        let semaphore = Arc::clone(&self.job_semaphore);
        let consumer = self.config.consumer_name.clone();
        let period = self.config.claim_interval;
        let min_idle = self.config.claim_min_idle;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        match scheduler.reclaim_stale(&consumer, min_idle).await {
                            Ok(Reclaimed { runnable, exhausted }) => {
                                // No attempt is left to render these sources.
                                for job in &exhausted {
                                    remove_quietly(&job.descriptor.source_path).await;
                                }
                                if !runnable.is_empty() {
                                    info!("Reclaimed {} stale jobs", runnable.len());
                                }
                                for claimed in runnable {
                                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                                        break;
                                    };
                                    let scheduler = scheduler.clone();
                                    let ctx = Arc::clone(&ctx);
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        execute_job(scheduler, ctx, claimed).await;
                                    });
                                }
                            }
                            Err(e) => warn!("Failed to reclaim stale jobs: {}", e),
                        }
                    }
                }
            }
        })
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        let slots = self.config.max_concurrent_jobs as u32;
        let _ = self.job_semaphore.acquire_many(slots).await;
    }
}

/// Run one attempt and settle it with the scheduler.
///
/// The cached source is removed once no further render can need it: after
/// success, after terminal failure, or when the artifact already exists.
async fn execute_job(scheduler: Scheduler, ctx: Arc<ProcessingContext>, claimed: ClaimedJob) {
    let logger = JobLogger::new(claimed.key(), "render_clip", claimed.attempt());
    let span = logger.create_span();

    async move {
        let started = Instant::now();
        let source = TransientFile::new(claimed.job.descriptor.source_path.clone());
        logger.log_start(&format!(
            "record {} ({}x{} -> {}x{})",
            claimed.job.descriptor.record_id,
            claimed.job.descriptor.input_width,
            claimed.job.descriptor.input_height,
            claimed.job.descriptor.output_width,
            claimed.job.descriptor.output_height,
        ));

        match process_job(&ctx, &claimed.job, &logger).await {
            Ok(processed) => {
                if let Err(e) = scheduler.complete(&claimed).await {
                    logger.log_error(&format!("failed to mark job completed: {}", e));
                    source.keep();
                    return;
                }

                metrics::histogram!("loopclip_job_duration_seconds", "outcome" => "completed")
                    .record(started.elapsed().as_secs_f64());
                logger.log_completion(&format!(
                    "{} (webhook: {}, render skipped: {})",
                    processed.outcome.message,
                    processed.webhook.is_some(),
                    processed.render_skipped
                ));
                source.release().await;
            }
            Err(AttemptError { error, rendered }) => {
                let message = error.failure_message();
                logger.log_warning(&message);

                match scheduler.fail_attempt(&claimed, &message, rendered).await {
                    Ok(AttemptOutcome::Retrying { delay, .. }) => {
                        logger.log_progress(&format!("retry scheduled in {:?}", delay));
                        if rendered {
                            source.release().await;
                        } else {
                            source.keep();
                        }
                    }
                    Ok(AttemptOutcome::Failed { attempts }) => {
                        metrics::histogram!("loopclip_job_duration_seconds", "outcome" => "failed")
                            .record(started.elapsed().as_secs_f64());
                        logger.log_error(&format!("giving up after {} attempts: {}", attempts, message));
                        source.release().await;
                    }
                    Err(e) => {
                        logger.log_error(&format!("failed to record failed attempt: {}", e));
                        source.keep();
                    }
                }
            }
        }
    }
    .instrument(span)
    .await
}
