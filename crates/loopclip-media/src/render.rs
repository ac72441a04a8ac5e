//! Clip rendering with the fixed MP4/H.264 output profile.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use loopclip_models::JobDescriptor;
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::filters::{compose_for_job, FilterChain, PIXEL_FORMAT};
use crate::fs_utils::remove_quietly;

/// Video codec of every rendered clip.
pub const VIDEO_CODEC: &str = "libx264";

/// Encoder timeout for a clip of `duration` seconds.
pub fn default_timeout(duration: f64) -> Duration {
    Duration::from_secs_f64(duration.max(0.0) * 20.0 + 60.0)
}

/// Result of a successful render.
#[derive(Debug, Clone)]
pub struct RenderReport {
    pub output_path: PathBuf,
    pub filter_chain: String,
    pub elapsed: Duration,
}

/// Renders a job to its output path.
#[async_trait]
pub trait ClipRenderer: Send + Sync {
    async fn render(&self, job: &JobDescriptor) -> MediaResult<RenderReport>;
}

/// Renders clips by running ffmpeg once per job.
#[derive(Debug, Clone, Default)]
pub struct FfmpegRenderer {
    binary: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl FfmpegRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    /// Fixed encoder timeout instead of one derived from the clip duration.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the encoder command writing to `output`.
    pub fn build_command(job: &JobDescriptor, chain: &FilterChain, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(&job.source_path, output)
            .loop_input()
            .video_filter(chain.to_string())
            .duration(job.duration)
            .framerate(job.framerate)
            .video_codec(VIDEO_CODEC)
            .pixel_format(PIXEL_FORMAT)
            .no_audio()
            .faststart()
            .output_args(["-f", "mp4"])
    }

    fn runner(&self, job: &JobDescriptor) -> FfmpegRunner {
        let runner = FfmpegRunner::new()
            .with_timeout(self.timeout.unwrap_or_else(|| default_timeout(job.duration)));
        match &self.binary {
            Some(binary) => runner.with_binary(binary),
            None => runner,
        }
    }
}

/// Path the encoder writes to before the artifact is moved into place.
fn partial_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!(".{}.partial", name))
}

#[async_trait]
impl ClipRenderer for FfmpegRenderer {
    async fn render(&self, job: &JobDescriptor) -> MediaResult<RenderReport> {
        let chain = compose_for_job(job);
        let partial = partial_path(&job.output_path);

        if let Some(parent) = job.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let cmd = Self::build_command(job, &chain, &partial);
        debug!(job_key = %job.key, filter = %chain, "Rendering clip");

        let start = Instant::now();
        let result = self.runner(job).run(&cmd).await;
        let elapsed = start.elapsed();

        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::histogram!("loopclip_ffmpeg_duration_seconds", "outcome" => outcome)
            .record(elapsed.as_secs_f64());

        if let Err(e) = result {
            remove_quietly(&partial).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&partial, &job.output_path).await {
            remove_quietly(&partial).await;
            return Err(e.into());
        }

        info!(
            job_key = %job.key,
            output = %job.output_path.display(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Rendered clip"
        );

        Ok(RenderReport {
            output_path: job.output_path.clone(),
            filter_chain: chain.to_string(),
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use loopclip_models::JobKey;

    fn job(input: (u32, u32), output: (u32, u32)) -> JobDescriptor {
        JobDescriptor {
            key: JobKey::from_string("abc.mp4"),
            record_id: "rec1".to_string(),
            input_url: "https://media.example.com/a.png".to_string(),
            webhook_url: None,
            framerate: 30.0,
            duration: 5.0,
            cache: false,
            zoom: 0.0,
            crop: false,
            input_width: input.0,
            input_height: input.1,
            output_width: output.0,
            output_height: output.1,
            request_origin: "api.example.com".to_string(),
            source_path: PathBuf::from("/cache/source-1"),
            output_path: PathBuf::from("/videos/team/abc.mp4"),
            public_path: "videos/team/abc.mp4".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_default_timeout() {
        assert_eq!(default_timeout(5.0), Duration::from_secs(160));
        assert_eq!(default_timeout(60.0), Duration::from_secs(1260));
    }

    #[test]
    fn test_command_profile() {
        let job = job((1920, 1080), (1920, 1080));
        let chain = compose_for_job(&job);
        let args = FfmpegRenderer::build_command(&job, &chain, Path::new("/videos/out.mp4"))
            .build_args();

        assert!(args.windows(2).any(|w| w == ["-loop", "1"]));
        assert!(args.windows(2).any(|w| w == ["-i", "/cache/source-1"]));
        assert!(args.windows(2).any(|w| w == ["-t", "5.000"]));
        assert!(args.windows(2).any(|w| w == ["-r", "30"]));
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "yuv420p"]));
        assert!(args.windows(2).any(|w| w == ["-movflags", "+faststart"]));
        assert!(args.windows(2).any(|w| w == ["-vf", "format=yuv420p,scale=1920:1080"]));
        assert!(args.contains(&"-an".to_string()));
        assert_eq!(args.last().unwrap(), "/videos/out.mp4");
    }

    #[test]
    fn test_partial_path_is_hidden_sibling() {
        let partial = partial_path(Path::new("/videos/team/abc.mp4"));
        assert_eq!(partial, PathBuf::from("/videos/team/.abc.mp4.partial"));
    }

    #[tokio::test]
    async fn test_failed_render_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = job((800, 600), (400, 400));
        job.output_path = dir.path().join("team").join("abc.mp4");

        let renderer = FfmpegRenderer::new().with_binary("/nonexistent/ffmpeg-binary");
        let err = renderer.render(&job).await.unwrap_err();

        assert!(matches!(err, crate::MediaError::FfmpegNotFound));
        assert!(!job.output_path.exists());
        assert!(!partial_path(&job.output_path).exists());
    }
}
