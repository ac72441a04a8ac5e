//! Single-attempt job processing: render, then notify.

use std::sync::Arc;

use loopclip_media::{ClipRenderer, FfmpegRenderer};
use loopclip_models::{JobOutcome, WebhookPayload};
use loopclip_queue::QueuedJob;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::notifier::Notifier;

/// Shared collaborators for job processing.
pub struct ProcessingContext {
    pub renderer: Arc<dyn ClipRenderer>,
    pub notifier: Notifier,
}

impl ProcessingContext {
    pub fn new(renderer: Arc<dyn ClipRenderer>, notifier: Notifier) -> Self {
        Self { renderer, notifier }
    }

    /// Context with the ffmpeg renderer.
    pub fn from_config(config: &WorkerConfig) -> WorkerResult<Self> {
        let renderer = match config.encoder_timeout {
            Some(timeout) => FfmpegRenderer::new().with_timeout(timeout),
            None => FfmpegRenderer::new(),
        };
        Ok(Self::new(
            Arc::new(renderer),
            Notifier::new(config.notifier.clone())?,
        ))
    }
}

/// A successful attempt.
#[derive(Debug, Clone)]
pub struct ProcessedJob {
    pub outcome: JobOutcome,
    pub webhook: Option<WebhookPayload>,
    /// Rendering was skipped because an earlier attempt produced the artifact
    pub render_skipped: bool,
}

/// A failed attempt.
#[derive(Debug)]
pub struct AttemptError {
    pub error: WorkerError,
    /// The artifact exists, so a retry only needs to notify
    pub rendered: bool,
}

/// Run one attempt of a job.
pub async fn process_job(
    ctx: &ProcessingContext,
    job: &QueuedJob,
    logger: &JobLogger,
) -> Result<ProcessedJob, AttemptError> {
    let descriptor = &job.descriptor;

    let already_rendered = job.rendered
        && tokio::fs::try_exists(&descriptor.output_path)
            .await
            .unwrap_or(false);

    if already_rendered {
        logger.log_progress("artifact already rendered, notifying only");
    } else {
        logger.log_progress("rendering");
        ctx.renderer
            .render(descriptor)
            .await
            .map_err(|e| AttemptError {
                error: e.into(),
                rendered: false,
            })?;
    }

    let webhook = ctx
        .notifier
        .notify(descriptor)
        .await
        .map_err(|error| AttemptError {
            error,
            rendered: true,
        })?;

    Ok(ProcessedJob {
        outcome: JobOutcome::success(descriptor, "Video rendered"),
        webhook,
        render_skipped: already_rendered,
    })
}
