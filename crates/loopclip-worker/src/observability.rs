//! Job lifecycle observer.
//!
//! Turns scheduler events into log lines and counters. Terminal failures
//! are logged at error level with the record id so they can be traced back
//! to the caller's request.

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use loopclip_queue::{JobEvent, Scheduler};

/// Spawn a task that observes `scheduler` until shutdown or channel close.
pub fn spawn_event_observer(
    scheduler: &Scheduler,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let mut events = scheduler.subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                received = events.recv() => match received {
                    Ok(event) => observe(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Job event observer lagged, {} events skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("Job event observer stopped");
    })
}

/// Record one event.
pub fn observe(event: &JobEvent) {
    metrics::counter!("loopclip_job_events_total", "event" => event.name()).increment(1);

    match event {
        JobEvent::Failed {
            key,
            record_id,
            attempts,
            error,
        } => {
            error!(
                job_key = %key,
                record_id = %record_id,
                attempts,
                "Job failed permanently: {}", error
            );
        }
        JobEvent::Retrying {
            key,
            attempt,
            delay_ms,
            error,
        } => {
            warn!(job_key = %key, attempt, delay_ms, "Job attempt failed: {}", error);
        }
        JobEvent::Completed { key, attempts } => {
            info!(job_key = %key, attempts, "Job completed");
        }
        JobEvent::Reclaimed { key, attempt } => {
            info!(job_key = %key, attempt, "Job reclaimed from a stalled consumer");
        }
        JobEvent::Enqueued { .. } | JobEvent::Started { .. } => {
            debug!(job_key = %event.key(), event = event.name(), "Job event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use loopclip_queue::{MemoryJobStore, RetryPolicy};

    use crate::test_support::descriptor;

    #[tokio::test]
    async fn test_observer_stops_on_shutdown() {
        let scheduler = Scheduler::new(Arc::new(MemoryJobStore::default()), RetryPolicy::default());
        let (tx, rx) = watch::channel(false);

        let handle = spawn_event_observer(&scheduler, rx);
        scheduler.enqueue(descriptor("a.mp4")).await.unwrap();

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("observer did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_observer_stops_when_scheduler_dropped() {
        let scheduler = Scheduler::new(Arc::new(MemoryJobStore::default()), RetryPolicy::default());
        let (_tx, rx) = watch::channel(false);

        let handle = spawn_event_observer(&scheduler, rx);
        drop(scheduler);

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("observer did not stop")
            .unwrap();
    }
}
