//! Shared fixtures for the workspace integration tests.

use std::path::{Path, PathBuf};

use chrono::Utc;
use loopclip_models::{JobDescriptor, JobKey};

/// A descriptor rendering `source` into `output_dir`.
pub fn descriptor(source: &Path, output_dir: &Path) -> JobDescriptor {
    let key = JobKey::generate();
    JobDescriptor {
        record_id: "it1".to_string(),
        input_url: "https://media.example.com/fixture.png".to_string(),
        webhook_url: None,
        framerate: 30.0,
        duration: 5.0,
        cache: false,
        zoom: 0.0,
        crop: false,
        input_width: 1920,
        input_height: 1080,
        output_width: 1920,
        output_height: 1080,
        request_origin: "localhost".to_string(),
        source_path: source.to_path_buf(),
        output_path: output_dir.join(key.as_str()),
        public_path: format!("videos/{}", key),
        key,
        created_at: Utc::now(),
    }
}

/// Redis URL for tests, from `REDIS_URL` or the local default.
pub fn redis_url() -> String {
    dotenvy::dotenv().ok();
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

/// Path for a fixture inside `dir`.
pub fn fixture_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}
