//! Per-attempt job logging and the subscriber setup shared by the binaries.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use loopclip_models::JobKey;

/// Logs one attempt of one job; every line carries the key, operation and attempt.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_key: String,
    operation: String,
    attempt: u32,
}

impl JobLogger {
    pub fn new(job_key: &JobKey, operation: &str, attempt: u32) -> Self {
        Self {
            job_key: job_key.to_string(),
            operation: operation.to_string(),
            attempt,
        }
    }

    /// Log the start of a job operation.
    pub fn log_start(&self, message: &str) {
        info!(
            job_key = %self.job_key,
            operation = %self.operation,
            attempt = self.attempt,
            "Job started: {}", message
        );
    }

    /// Log a progress update during job execution.
    pub fn log_progress(&self, message: &str) {
        info!(
            job_key = %self.job_key,
            operation = %self.operation,
            attempt = self.attempt,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_key = %self.job_key,
            operation = %self.operation,
            attempt = self.attempt,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_key = %self.job_key,
            operation = %self.operation,
            attempt = self.attempt,
            "Job error: {}", message
        );
    }

    /// Log the completion of a job operation.
    pub fn log_completion(&self, message: &str) {
        info!(
            job_key = %self.job_key,
            operation = %self.operation,
            attempt = self.attempt,
            "Job completed: {}", message
        );
    }

    pub fn job_key(&self) -> &str {
        &self.job_key
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_key = %self.job_key,
            operation = %self.operation,
            attempt = self.attempt
        )
    }
}

/// Install the global tracing subscriber.
///
/// `LOG_FORMAT=json` selects JSON lines; otherwise ANSI text. `RUST_LOG`
/// overrides the default `loopclip=info` directive.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("loopclip=info,tower_http=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}
