//! Job definitions shared by the intake path, the scheduler and workers.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::request::JobRequest;

/// Extension of every rendered artifact.
pub const OUTPUT_EXTENSION: &str = "mp4";

/// Job identity: the generated output filename.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKey(pub String);

impl JobKey {
    /// Generate a new random output filename.
    pub fn generate() -> Self {
        Self(format!("{}.{}", Uuid::new_v4().simple(), OUTPUT_EXTENSION))
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal state of a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Rendered and, if requested, notified
    Completed,
    /// Attempt budget exhausted
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Source artifact after download and probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Cached copy of the downloaded artifact
    pub path: PathBuf,
    /// Probed width in pixels
    pub width: u32,
    /// Probed height in pixels
    pub height: u32,
}

/// Where the rendered artifact goes and how it is addressed publicly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPlacement {
    /// Host the request arrived on, used to build the public URL
    pub request_origin: String,
    /// Filesystem destination of the rendered artifact
    pub output_path: PathBuf,
    /// URL path of the artifact under the public static root
    pub public_path: String,
}

/// Everything a worker needs to render one clip. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub key: JobKey,
    pub record_id: String,
    pub input_url: String,
    pub webhook_url: Option<String>,
    pub framerate: f64,
    pub duration: f64,
    pub cache: bool,
    /// Zoom with the configured default already applied
    pub zoom: f64,
    pub crop: bool,
    pub input_width: u32,
    pub input_height: u32,
    pub output_width: u32,
    pub output_height: u32,
    pub request_origin: String,
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    pub public_path: String,
    pub created_at: DateTime<Utc>,
}

impl JobDescriptor {
    /// Assemble a descriptor from a validated request and an acquired source.
    pub fn new(
        key: JobKey,
        request: JobRequest,
        default_zoom: f64,
        source: SourceInfo,
        placement: OutputPlacement,
    ) -> Self {
        let zoom = request.effective_zoom(default_zoom);
        Self {
            key,
            record_id: request.record_id,
            input_url: request.input_url,
            webhook_url: request.webhook_url,
            framerate: request.framerate,
            duration: request.duration,
            cache: request.cache,
            zoom,
            crop: request.crop,
            input_width: source.width,
            input_height: source.height,
            output_width: request.output_width,
            output_height: request.output_height,
            request_origin: placement.request_origin,
            source_path: source.path,
            output_path: placement.output_path,
            public_path: placement.public_path,
            created_at: Utc::now(),
        }
    }
}

/// Result reported for a finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub success: bool,
    pub message: String,
    pub input_width: u32,
    pub input_height: u32,
    pub output_width: u32,
    pub output_height: u32,
}

impl JobOutcome {
    pub fn success(job: &JobDescriptor, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            input_width: job.input_width,
            input_height: job.input_height,
            output_width: job.output_width,
            output_height: job.output_height,
        }
    }
}

/// Body posted to the caller's webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub record_id: String,
    /// Absolute URL of the rendered artifact
    pub filename: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> JobRequest {
        JobRequest {
            record_id: "rec1".to_string(),
            input_url: "https://media.example.com/a.png".to_string(),
            webhook_url: Some("https://hooks.example.com/x".to_string()),
            framerate: 25.0,
            duration: 3.0,
            cache: true,
            zoom: None,
            crop: true,
            output_width: 400,
            output_height: 400,
        }
    }

    #[test]
    fn test_job_key_is_mp4_filename() {
        let key = JobKey::generate();
        assert!(key.as_str().ends_with(".mp4"));
        assert!(!key.as_str().contains('/'));
        assert_ne!(key, JobKey::generate());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(JobState::Completed.to_string(), "completed");
        assert_eq!(
            serde_json::to_string(&JobState::Failed).unwrap(),
            "\"failed\""
        );
    }

    #[test]
    fn test_descriptor_resolves_default_zoom() {
        let key = JobKey::from_string("abc.mp4");
        let job = JobDescriptor::new(
            key.clone(),
            request(),
            15.0,
            SourceInfo {
                path: PathBuf::from("/tmp/cache/abc"),
                width: 800,
                height: 600,
            },
            OutputPlacement {
                request_origin: "api.example.com".to_string(),
                output_path: PathBuf::from("/srv/videos/team/abc.mp4"),
                public_path: "videos/team/abc.mp4".to_string(),
            },
        );

        assert_eq!(job.key, key);
        assert_eq!(job.zoom, 15.0);
        assert_eq!((job.input_width, job.input_height), (800, 600));

        let outcome = JobOutcome::success(&job, "done");
        assert!(outcome.success);
        assert_eq!(outcome.output_width, 400);
    }
}
