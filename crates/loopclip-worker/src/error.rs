//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Render failed: {0}")]
    Render(#[from] loopclip_media::MediaError),

    #[error("Webhook delivery failed: {0}")]
    NotificationFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Queue error: {0}")]
    Queue(#[from] loopclip_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn notification_failed(msg: impl Into<String>) -> Self {
        Self::NotificationFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Message recorded against the job, with the last encoder diagnostic line
    /// appended when one was captured.
    pub fn failure_message(&self) -> String {
        let last_line = match self {
            WorkerError::Render(e) => e
                .diagnostics()
                .and_then(|d| d.lines().rev().find(|l| !l.trim().is_empty())),
            _ => None,
        };

        match last_line {
            Some(line) => format!("{}: {}", self, line.trim()),
            None => self.to_string(),
        }
    }
}
