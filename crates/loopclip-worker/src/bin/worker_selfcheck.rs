use std::path::{Path, PathBuf};

use loopclip_media::{check_ffmpeg, check_ffprobe};
use loopclip_queue::{QueueBackend, QueueConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cache_dir = dir_from_env("CACHE_DIR", "cache");
    let output_dir = dir_from_env("OUTPUT_DIR", "videos");

    println!(
        "worker-selfcheck: starting with cache_dir={} output_dir={}",
        cache_dir.display(),
        output_dir.display()
    );

    check_ffmpeg().map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;
    check_ffprobe().map_err(|e| anyhow::anyhow!("ffprobe not available: {}", e))?;
    ensure_writable(&cache_dir).await?;
    ensure_writable(&output_dir).await?;

    let queue = QueueConfig::from_env()?;
    if queue.backend == QueueBackend::Redis {
        ensure_env_present(&["REDIS_URL"])?;
    }

    println!("worker-selfcheck: ok");
    Ok(())
}

fn dir_from_env(key: &str, default: &str) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

async fn ensure_writable(path: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path).await?;
    let probe = path.join(".selfcheck");
    tokio::fs::write(&probe, b"ok")
        .await
        .map_err(|e| anyhow::anyhow!("{} is not writable: {}", path.display(), e))?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
