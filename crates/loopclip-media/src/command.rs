//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::{is_progress_line, parse_progress_line, FfmpegProgress};

/// Upper bound on retained diagnostic text.
const MAX_DIAGNOSTIC_BYTES: usize = 16 * 1024;

/// One ffmpeg invocation: a single input, a single output file.
///
/// Global flags are fixed: overwrite, errors-only logging and machine-readable
/// progress on stderr, which [`FfmpegRunner`] separates from diagnostics.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    before_input: Vec<String>,
    after_input: Vec<String>,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            before_input: Vec::new(),
            after_input: Vec::new(),
        }
    }

    fn input_flag(mut self, flag: &str, value: impl Into<String>) -> Self {
        self.before_input.push(flag.to_string());
        self.before_input.push(value.into());
        self
    }

    fn output_flag(mut self, flag: &str, value: impl Into<String>) -> Self {
        self.after_input.push(flag.to_string());
        self.after_input.push(value.into());
        self
    }

    /// Extra output arguments, appended verbatim.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after_input.extend(args.into_iter().map(Into::into));
        self
    }

    /// Repeat the single input frame for as long as the output runs.
    pub fn loop_input(self) -> Self {
        self.input_flag("-loop", "1")
    }

    pub fn duration(self, seconds: f64) -> Self {
        self.output_flag("-t", format!("{:.3}", seconds))
    }

    pub fn framerate(self, fps: f64) -> Self {
        self.output_flag("-r", fps.to_string())
    }

    pub fn video_filter(self, chain: impl Into<String>) -> Self {
        self.output_flag("-vf", chain)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_flag("-c:v", codec)
    }

    pub fn pixel_format(self, pix_fmt: impl Into<String>) -> Self {
        self.output_flag("-pix_fmt", pix_fmt)
    }

    pub fn no_audio(self) -> Self {
        self.output_args(["-an"])
    }

    /// moov atom first, so playback can start before the download ends.
    pub fn faststart(self) -> Self {
        self.output_flag("-movflags", "+faststart")
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn build_args(&self) -> Vec<String> {
        let global = ["-y", "-v", "error", "-progress", "pipe:2", "-nostats"];

        global
            .iter()
            .map(|s| s.to_string())
            .chain(self.before_input.iter().cloned())
            .chain(["-i".to_string(), self.input.to_string_lossy().into_owned()])
            .chain(self.after_input.iter().cloned())
            .chain(std::iter::once(self.output.to_string_lossy().into_owned()))
            .collect()
    }
}

/// Captured output of a finished FFmpeg process.
#[derive(Debug, Clone, Default)]
pub struct FfmpegOutput {
    /// Non-progress stderr lines
    pub diagnostics: String,
    /// Everything written to stdout
    pub stdout: String,
    /// Last progress snapshot
    pub progress: Option<FfmpegProgress>,
}

/// Runs FFmpeg to completion with a timeout.
///
/// Both output streams are drained fully before the result is reported, and
/// the process is killed if the timeout elapses.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    binary: PathBuf,
    timeout: Option<Duration>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            timeout: None,
        }
    }

    /// Use a specific ffmpeg binary instead of the one on PATH.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run `cmd` to completion.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<FfmpegOutput> {
        let args = cmd.build_args();
        debug!("Running FFmpeg: {} {}", self.binary.display(), args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => MediaError::FfmpegNotFound,
                _ => MediaError::ffmpeg_failed(format!("failed to spawn ffmpeg: {}", e), None, None),
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("stderr not captured", None, None))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("stdout not captured", None, None))?;

        let stderr_task = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            let mut current = FfmpegProgress::default();
            let mut last = None;
            let mut diagnostics = String::new();

            while let Ok(Some(line)) = reader.next_line().await {
                if is_progress_line(&line) {
                    if let Some(snapshot) = parse_progress_line(&line, &mut current) {
                        debug!(
                            frame = snapshot.frame,
                            out_time_ms = snapshot.out_time_ms,
                            speed = snapshot.speed,
                            "FFmpeg progress"
                        );
                        last = Some(snapshot);
                    }
                } else if diagnostics.len() < MAX_DIAGNOSTIC_BYTES {
                    diagnostics.push_str(&line);
                    diagnostics.push('\n');
                }
            }

            (diagnostics, last)
        });

        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        });

        let status = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(
                        "FFmpeg timed out after {} seconds, killing process",
                        timeout.as_secs()
                    );
                    let _ = child.kill().await;
                    let _ = stderr_task.await;
                    let _ = stdout_task.await;
                    return Err(MediaError::Timeout(timeout.as_secs()));
                }
            },
            None => child.wait().await?,
        };

        let (diagnostics, progress) = stderr_task.await.unwrap_or_default();
        let stdout = stdout_task.await.unwrap_or_default();

        if status.success() {
            Ok(FfmpegOutput {
                diagnostics,
                stdout,
                progress,
            })
        } else {
            let stderr = diagnostics.trim();
            Err(MediaError::ffmpeg_failed(
                format!("FFmpeg exited with status {}", status),
                (!stderr.is_empty()).then(|| stderr.to_string()),
                status.code(),
            ))
        }
    }
}

/// Locate ffmpeg on PATH.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Locate ffprobe on PATH.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}
