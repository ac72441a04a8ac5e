//! Source acquisition: bounded HTTP download into the cache directory, then probe.
//!
//! The body is streamed into a temporary file inside the cache directory and
//! only persisted under its final name once it completed within the size
//! ceiling. A failed probe removes the persisted file again, so no partial or
//! unusable artifact stays addressable.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use loopclip_models::SourceInfo;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::remove_quietly;
use crate::probe::Prober;

/// Default download size ceiling (10 MiB).
pub const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Default download timeout.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Downloads a source artifact and reports its probed dimensions.
#[async_trait]
pub trait SourceAcquirer: Send + Sync {
    async fn acquire(&self, url: &str) -> MediaResult<SourceInfo>;
}

/// Acquirer settings.
#[derive(Debug, Clone)]
pub struct AcquirerConfig {
    pub cache_dir: PathBuf,
    pub max_bytes: u64,
    pub timeout: Duration,
}

impl AcquirerConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            max_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            timeout: DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }
}

/// HTTP + ffprobe implementation of [`SourceAcquirer`].
#[derive(Debug, Clone)]
pub struct Acquirer {
    client: reqwest::Client,
    prober: Prober,
    config: Arc<AcquirerConfig>,
}

impl Acquirer {
    pub fn new(config: AcquirerConfig) -> MediaResult<Self> {
        // Only the validated URL is fetched; a redirect could point anywhere.
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| MediaError::download_failed(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            prober: Prober::new(),
            config: Arc::new(config),
        })
    }

    /// Use a custom prober.
    pub fn with_prober(mut self, prober: Prober) -> Self {
        self.prober = prober;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }

    /// Download `url` into the cache directory and return the cached path.
    pub async fn download(&self, url: &str) -> MediaResult<PathBuf> {
        let start = Instant::now();
        let result = self.download_inner(url).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(MediaError::Timeout(_)) => "timeout",
            Err(MediaError::TooLarge { .. }) => "too_large",
            Err(MediaError::UnsupportedContentType(_)) => "content_type",
            Err(_) => "error",
        };
        metrics::counter!("loopclip_downloads_total", "outcome" => outcome).increment(1);
        metrics::histogram!("loopclip_download_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        result
    }

    async fn download_inner(&self, url: &str) -> MediaResult<PathBuf> {
        let limit = self.config.max_bytes;
        tokio::fs::create_dir_all(&self.config.cache_dir).await?;

        debug!(url = %url, "Downloading source artifact");

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::download_failed(format!(
                "source responded with HTTP {}",
                status
            )));
        }

        if let Some(value) = response.headers().get(CONTENT_TYPE) {
            let raw = value.to_str().unwrap_or_default();
            if is_rejected_content_type(raw) {
                return Err(MediaError::UnsupportedContentType(raw.to_string()));
            }
        }

        let declared = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared.is_some_and(|len| len > limit) {
            return Err(MediaError::TooLarge { limit });
        }

        // Dropping `tmp` on any early return deletes the partial file.
        let tmp = tempfile::Builder::new()
            .prefix(".partial-")
            .tempfile_in(&self.config.cache_dir)?;
        let mut file = tokio::fs::File::from_std(tmp.reopen()?);
        let mut received: u64 = 0;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.map_request_error(e))?
        {
            received += chunk.len() as u64;
            if received > limit {
                return Err(MediaError::TooLarge { limit });
            }
            file.write_all(&chunk).await?;
        }

        if received == 0 {
            return Err(MediaError::download_failed("source body was empty"));
        }

        file.flush().await?;
        drop(file);

        let final_path = self
            .config
            .cache_dir
            .join(format!("source-{}", Uuid::new_v4().simple()));
        tmp.persist(&final_path).map_err(|e| MediaError::Io(e.error))?;

        info!(
            url = %url,
            path = %final_path.display(),
            bytes = received,
            "Downloaded source artifact"
        );

        Ok(final_path)
    }

    fn map_request_error(&self, e: reqwest::Error) -> MediaError {
        if e.is_timeout() {
            MediaError::Timeout(self.config.timeout.as_secs())
        } else {
            MediaError::download_failed(e.to_string())
        }
    }
}

#[async_trait]
impl SourceAcquirer for Acquirer {
    async fn acquire(&self, url: &str) -> MediaResult<SourceInfo> {
        let path = self.download(url).await?;

        match self.prober.dimensions(&path).await {
            Ok(dims) => {
                debug!(
                    path = %path.display(),
                    width = dims.width,
                    height = dims.height,
                    "Probed source artifact"
                );
                Ok(SourceInfo {
                    path,
                    width: dims.width,
                    height: dims.height,
                })
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Probe failed, discarding cached source");
                remove_quietly(&path).await;
                Err(e)
            }
        }
    }
}

/// Content types that indicate an error page or document rather than media.
pub fn is_rejected_content_type(raw: &str) -> bool {
    let Ok(parsed) = raw.parse::<mime::Mime>() else {
        return true;
    };

    if parsed.type_() == mime::TEXT {
        return true;
    }
    if parsed.type_() == mime::APPLICATION
        && (parsed.subtype() == mime::JSON || parsed.subtype() == mime::XML)
    {
        return true;
    }
    matches!(parsed.suffix(), Some(s) if s == mime::JSON || s == mime::XML)
}
