//! FFprobe dimension lookup.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{MediaError, MediaResult};

/// Pixel dimensions of the first video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    width: Option<u32>,
    height: Option<u32>,
}

/// Runs ffprobe against cached source files.
#[derive(Debug, Clone)]
pub struct Prober {
    binary: PathBuf,
}

impl Default for Prober {
    fn default() -> Self {
        Self::new()
    }
}

impl Prober {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("ffprobe"),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Probe the width and height of the first video stream.
    pub async fn dimensions(&self, path: impl AsRef<Path>) -> MediaResult<Dimensions> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }

        let output = Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => MediaError::FfprobeNotFound,
                _ => MediaError::FfprobeFailed {
                    message: format!("failed to spawn ffprobe: {}", e),
                    stderr: None,
                },
            })?;

        if !output.status.success() {
            return Err(MediaError::FfprobeFailed {
                message: format!("FFprobe exited with status {}", output.status),
                stderr: Some(String::from_utf8_lossy(&output.stderr).trim().to_string()),
            });
        }

        parse_dimensions(&output.stdout)
    }
}

/// Parse ffprobe's JSON output into dimensions.
pub fn parse_dimensions(stdout: &[u8]) -> MediaResult<Dimensions> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let stream = probe
        .streams
        .first()
        .ok_or_else(|| MediaError::InvalidVideo("No video stream found".to_string()))?;

    match (stream.width, stream.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => Ok(Dimensions { width, height }),
        _ => Err(MediaError::InvalidVideo(
            "Video stream has no usable dimensions".to_string(),
        )),
    }
}
