//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info, warn};

use loopclip_api::{create_router, metrics, ApiConfig, AppState};
use loopclip_queue::{QueueBackend, QueueConfig, Scheduler};
use loopclip_worker::{
    init_tracing, retry_async, spawn_event_observer, JobExecutor, ProcessingContext, RetryConfig,
    WorkerConfig,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }

    init_tracing();

    info!("Starting loopclip-api");

    let config = ApiConfig::from_env();
    info!("API config: host={}, port={}", config.host, config.port);

    let queue_config = match QueueConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid queue configuration: {}", e);
            std::process::exit(1);
        }
    };

    if queue_config.backend == QueueBackend::Memory && !config.embedded_worker {
        error!("QUEUE_BACKEND=memory needs EMBEDDED_WORKER=true; no other process can drain it");
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

    if let Err(e) = tokio::fs::create_dir_all(&config.output_dir).await {
        error!("Failed to create output directory {}: {}", config.output_dir.display(), e);
        std::process::exit(1);
    }

    let state = match AppState::from_env(config.clone(), scheduler.clone()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create application state: {}", e);
            std::process::exit(1);
        }
    };
    if state.api_keys.is_empty() {
        warn!("API_KEYS is empty; every intake request will be rejected");
    }

    let metrics_handle = if config.metrics_enabled {
        match metrics::init_metrics() {
            Ok(handle) => {
                info!("Prometheus metrics enabled at /metrics");
                Some(handle)
            }
            Err(e) => {
                warn!("Failed to install Prometheus recorder: {}", e);
                None
            }
        }
    } else {
        None
    };

    // Embedded worker drains the same scheduler in this process
    let worker = if config.embedded_worker {
        let worker_config = WorkerConfig::from_env();
        let ctx = match ProcessingContext::from_config(&worker_config) {
            Ok(ctx) => ctx,
            Err(e) => {
                error!("Failed to create processing context: {}", e);
                std::process::exit(1);
            }
        };

        let executor = Arc::new(JobExecutor::new(worker_config, scheduler.clone(), ctx));
        let observer = spawn_event_observer(&scheduler, executor.shutdown_signal());
        let runner = Arc::clone(&executor);
        let task = tokio::spawn(async move { runner.run().await });
        info!("Embedded worker started");
        Some((executor, task, observer))
    } else {
        None
    };

    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid bind address: {}", e);
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    info!("Listening on {}", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    if let Some((executor, task, observer)) = worker {
        executor.shutdown();
        match task.await {
            Ok(Err(e)) => error!("Embedded worker error: {}", e),
            Err(e) => error!("Embedded worker task failed: {}", e),
            Ok(Ok(())) => {}
        }
        observer.await.ok();
    }

    info!("Server shutdown complete");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
