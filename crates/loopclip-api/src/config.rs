//! API configuration.

use std::path::PathBuf;

use loopclip_media::{DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_MAX_DOWNLOAD_BYTES};
use std::time::Duration;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Max request body size
    pub max_body_size: usize,
    /// Where downloaded sources are cached until rendered
    pub cache_dir: PathBuf,
    /// Root of the rendered artifacts served under `/videos`
    pub output_dir: PathBuf,
    /// Zoom applied when a request omits it
    pub default_zoom: f64,
    pub download_max_bytes: u64,
    pub download_timeout: Duration,
    pub metrics_enabled: bool,
    /// Run the render executor inside the API process
    pub embedded_worker: bool,
    /// Environment (development/production)
    pub environment: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            max_body_size: 64 * 1024,
            cache_dir: PathBuf::from("cache"),
            output_dir: PathBuf::from("videos"),
            default_zoom: 0.0,
            download_max_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            metrics_enabled: true,
            embedded_worker: false,
            environment: "development".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_parse("API_PORT").unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            max_body_size: env_parse("MAX_BODY_SIZE").unwrap_or(defaults.max_body_size),
            cache_dir: std::env::var("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            output_dir: std::env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            default_zoom: env_parse::<f64>("DEFAULT_ZOOM")
                .map(|z| z.clamp(-100.0, 100.0))
                .unwrap_or(defaults.default_zoom),
            download_max_bytes: env_parse("DOWNLOAD_MAX_BYTES").unwrap_or(defaults.download_max_bytes),
            download_timeout: env_parse("DOWNLOAD_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.download_timeout),
            metrics_enabled: env_flag("METRICS_ENABLED").unwrap_or(defaults.metrics_enabled),
            embedded_worker: env_flag("EMBEDDED_WORKER").unwrap_or(defaults.embedded_worker),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}
