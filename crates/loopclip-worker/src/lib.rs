//! Render worker.
//!
//! This crate provides:
//! - Job executor that drains the scheduler with bounded concurrency
//! - Render-then-notify processing with a notify-only retry path
//! - Webhook delivery
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod notifier;
pub mod observability;
pub mod processor;
pub mod retry;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::{init_tracing, JobLogger};
pub use notifier::{artifact_url, Notifier, NotifierConfig};
pub use observability::spawn_event_observer;
pub use processor::{process_job, AttemptError, ProcessedJob, ProcessingContext};
pub use retry::{retry_async, FailureTracker, RetryConfig};

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;

    use chrono::Utc;
    use loopclip_models::{JobDescriptor, JobKey};

    pub fn descriptor(key: &str) -> JobDescriptor {
        JobDescriptor {
            key: JobKey::from_string(key),
            record_id: "rec1".to_string(),
            input_url: "https://media.example.com/a.png".to_string(),
            webhook_url: None,
            framerate: 30.0,
            duration: 5.0,
            cache: false,
            zoom: 0.0,
            crop: false,
            input_width: 800,
            input_height: 600,
            output_width: 400,
            output_height: 400,
            request_origin: "api.example.com".to_string(),
            source_path: PathBuf::from("/cache/source"),
            output_path: PathBuf::from(format!("/videos/team/{}", key)),
            public_path: format!("videos/team/{}", key),
            created_at: Utc::now(),
        }
    }
}
