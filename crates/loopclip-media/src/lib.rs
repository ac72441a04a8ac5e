//! FFmpeg CLI wrapper and media helpers for loopclip.
//!
//! This crate provides:
//! - Deterministic filter chain composition (crop, pad, zoom, scale)
//! - Type-safe FFmpeg command building and a runner with timeout
//! - Progress parsing from `-progress pipe:2`
//! - Source acquisition (bounded download + ffprobe)
//! - Transient cache file cleanup

pub mod command;
pub mod download;
pub mod error;
pub mod filters;
pub mod fs_utils;
pub mod probe;
pub mod progress;
pub mod render;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegOutput, FfmpegRunner};
pub use download::{
    is_rejected_content_type, Acquirer, AcquirerConfig, SourceAcquirer,
    DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_MAX_DOWNLOAD_BYTES,
};
pub use error::{MediaError, MediaResult};
pub use filters::{compose, compose_for_job, ComposeParams, FilterChain, FilterStage, ZoomDirection, ZoomStage};
pub use fs_utils::{remove_quietly, TransientFile};
pub use probe::{parse_dimensions, Dimensions, Prober};
pub use progress::FfmpegProgress;
pub use render::{default_timeout, ClipRenderer, FfmpegRenderer, RenderReport};
