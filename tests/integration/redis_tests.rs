//! Redis-backed scheduler integration tests.

use std::sync::Arc;
use std::time::Duration;

use loopclip_integration_tests::{descriptor, redis_url};
use loopclip_queue::{
    AttemptOutcome, JobStore, QueueBackend, QueueConfig, QueueError, RedisJobStore, RetryPolicy,
    Scheduler,
};

/// Config with an isolated key prefix so runs do not interfere.
fn test_config() -> QueueConfig {
    let run = uuid::Uuid::new_v4().simple().to_string();
    QueueConfig {
        backend: QueueBackend::Redis,
        redis_url: redis_url(),
        key_prefix: format!("loopclip-test-{}", run),
        consumer_group: format!("loopclip-test-{}:workers", run),
        retry: RetryPolicy::default().with_base_delay(Duration::from_millis(50)),
        ..QueueConfig::default()
    }
}

async fn scheduler(config: &QueueConfig) -> Scheduler {
    let store = RedisJobStore::connect(config)
        .await
        .expect("Failed to connect to Redis");
    Scheduler::new(Arc::new(store), config.retry)
}

fn job() -> loopclip_models::JobDescriptor {
    let dir = std::env::temp_dir();
    descriptor(&dir.join("source"), &dir)
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_enqueue_claim_complete() {
    let config = test_config();
    let scheduler = scheduler(&config).await;

    let key = scheduler.enqueue(job()).await.expect("Failed to enqueue");
    assert_eq!(scheduler.stats().await.unwrap().queued, 1);

    let claimed = scheduler
        .next_job("it-consumer", Duration::from_millis(500))
        .await
        .unwrap()
        .expect("job should be claimable");
    assert_eq!(claimed.key(), &key);
    assert_eq!(claimed.attempt(), 1);

    scheduler.complete(&claimed).await.unwrap();

    let stats = scheduler.stats().await.unwrap();
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.completed, 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_duplicate_key_rejected() {
    let config = test_config();
    let scheduler = scheduler(&config).await;
    let job = job();

    scheduler.enqueue(job.clone()).await.unwrap();
    let err = scheduler.enqueue(job).await.unwrap_err();
    assert!(matches!(err, QueueError::Duplicate(_)));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_retry_budget_is_three_attempts() {
    let config = test_config();
    let scheduler = scheduler(&config).await;
    scheduler.enqueue(job()).await.unwrap();

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        let claimed = loop {
            scheduler.promote_due().await.unwrap();
            if let Some(claimed) = scheduler
                .next_job("it-consumer", Duration::from_millis(100))
                .await
                .unwrap()
            {
                break claimed;
            }
        };
        outcomes.push(
            scheduler
                .fail_attempt(&claimed, "encoder exited with status 1", false)
                .await
                .unwrap(),
        );
    }

    assert!(matches!(outcomes[0], AttemptOutcome::Retrying { attempt: 1, .. }));
    assert!(matches!(outcomes[1], AttemptOutcome::Retrying { attempt: 2, .. }));
    assert_eq!(outcomes[2], AttemptOutcome::Failed { attempts: 3 });

    tokio::time::sleep(Duration::from_millis(300)).await;
    scheduler.promote_due().await.unwrap();
    assert!(scheduler
        .next_job("it-consumer", Duration::from_millis(100))
        .await
        .unwrap()
        .is_none());
    assert_eq!(scheduler.stats().await.unwrap().failed, 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_stale_job_is_reclaimed() {
    let config = test_config();
    let scheduler = scheduler(&config).await;
    let key = scheduler.enqueue(job()).await.unwrap();

    // Claimed by a consumer that then disappears.
    scheduler
        .next_job("crashed", Duration::from_millis(500))
        .await
        .unwrap()
        .expect("job should be claimable");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let reclaimed = scheduler
        .reclaim_stale("rescuer", Duration::from_millis(10))
        .await
        .unwrap();

    assert!(reclaimed.exhausted.is_empty());
    assert_eq!(reclaimed.runnable.len(), 1);
    assert_eq!(reclaimed.runnable[0].key(), &key);
    assert_eq!(reclaimed.runnable[0].attempt(), 2);
    scheduler.complete(&reclaimed.runnable[0]).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_stalled_final_attempt_fails() {
    let mut config = test_config();
    config.retry = config.retry.with_max_attempts(1);
    let scheduler = scheduler(&config).await;
    scheduler.enqueue(job()).await.unwrap();

    scheduler
        .next_job("crashed", Duration::from_millis(500))
        .await
        .unwrap()
        .expect("job should be claimable");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let reclaimed = scheduler
        .reclaim_stale("rescuer", Duration::from_millis(10))
        .await
        .unwrap();

    assert!(reclaimed.runnable.is_empty());
    assert_eq!(reclaimed.exhausted.len(), 1);
    let stats = scheduler.stats().await.unwrap();
    assert_eq!((stats.active, stats.failed), (0, 1));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_concurrent_promotion_moves_job_once() {
    let config = test_config();
    let scheduler = scheduler(&config).await;
    scheduler.enqueue(job()).await.unwrap();

    let claimed = scheduler
        .next_job("it-consumer", Duration::from_millis(500))
        .await
        .unwrap()
        .unwrap();
    scheduler.fail_attempt(&claimed, "boom", false).await.unwrap();
    assert_eq!(scheduler.stats().await.unwrap().delayed, 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let (a, b) = tokio::join!(scheduler.promote_due(), scheduler.promote_due());
    assert_eq!(a.unwrap() + b.unwrap(), 1);

    let stats = scheduler.stats().await.unwrap();
    assert_eq!((stats.delayed, stats.queued), (0, 1));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_foreign_lease_cannot_complete() {
    let config = test_config();
    let store = Arc::new(RedisJobStore::connect(&config).await.unwrap());
    let scheduler = Scheduler::new(store.clone(), config.retry);
    scheduler.enqueue(job()).await.unwrap();

    let mut claimed = scheduler
        .next_job("owner", Duration::from_millis(500))
        .await
        .unwrap()
        .unwrap();
    claimed.consumer = "intruder".to_string();

    let err = store.complete(&claimed).await.unwrap_err();
    assert!(matches!(err, QueueError::NotClaimed(_)));
}
