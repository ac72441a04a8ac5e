//! Render worker binary.

use tracing::{error, info};

use loopclip_queue::{QueueBackend, QueueConfig, Scheduler};
use loopclip_worker::{
    init_tracing, retry_async, spawn_event_observer, JobExecutor, ProcessingContext,
    RetryConfig, WorkerConfig,
};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for HTTPS webhooks)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting loopclip-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let queue_config = match QueueConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid queue configuration: {}", e);
            std::process::exit(1);
        }
    };

    // The memory backend lives inside one process; only the API's embedded
    // worker can share it.
    if queue_config.backend == QueueBackend::Memory {
        error!("QUEUE_BACKEND=memory requires the API's embedded worker (EMBEDDED_WORKER=true)");
        std::process::exit(1);
    }

    let connect = RetryConfig::new("queue connect").with_max_retries(5);
    let scheduler = match retry_async(&connect, || Scheduler::from_config(&queue_config)).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to connect to the job queue: {}", e);
            std::process::exit(1);
        }
    };

    let ctx = match ProcessingContext::from_config(&config) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Failed to create processing context: {}", e);
            std::process::exit(1);
        }
    };

    let executor = std::sync::Arc::new(JobExecutor::new(config, scheduler.clone(), ctx));
    let observer = spawn_event_observer(&scheduler, executor.shutdown_signal());

    // Setup signal handlers
    let signal_executor = std::sync::Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    observer.await.ok();
    info!("Worker shutdown complete");
}
