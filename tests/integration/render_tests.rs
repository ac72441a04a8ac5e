//! ffmpeg-backed rendering integration tests.

use std::path::Path;

use loopclip_integration_tests::{descriptor, fixture_path};
use loopclip_media::{compose_for_job, ClipRenderer, FfmpegRenderer, Prober};

/// Write a single solid-colour frame of the given size.
async fn make_fixture(path: &Path, width: u32, height: u32) {
    let status = tokio::process::Command::new("ffmpeg")
        .args(["-y", "-v", "error", "-f", "lavfi", "-i"])
        .arg(format!("color=c=blue:s={}x{}", width, height))
        .args(["-frames:v", "1"])
        .arg(path)
        .status()
        .await
        .expect("ffmpeg should be installed");
    assert!(status.success(), "fixture generation failed");
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_dimensions_match_fixture() {
    let dir = tempfile::tempdir().unwrap();
    let source = fixture_path(dir.path(), "fixture.png");
    make_fixture(&source, 1920, 1080).await;

    let dims = Prober::new().dimensions(&source).await.unwrap();
    assert_eq!((dims.width, dims.height), (1920, 1080));
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_render_same_size_without_reframing() {
    let dir = tempfile::tempdir().unwrap();
    let source = fixture_path(dir.path(), "fixture.png");
    make_fixture(&source, 1920, 1080).await;

    let job = descriptor(&source, &dir.path().join("out"));
    let chain = compose_for_job(&job);
    assert!(chain.crop().is_none());
    assert!(chain.pad().is_none());
    assert!(chain.zoom().is_none());

    let report = FfmpegRenderer::new().render(&job).await.unwrap();
    assert_eq!(report.output_path, job.output_path);

    let dims = Prober::new().dimensions(&job.output_path).await.unwrap();
    assert_eq!((dims.width, dims.height), (1920, 1080));
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_render_crop_with_zoom() {
    let dir = tempfile::tempdir().unwrap();
    let source = fixture_path(dir.path(), "fixture.png");
    make_fixture(&source, 800, 600).await;

    let mut job = descriptor(&source, dir.path());
    job.input_width = 800;
    job.input_height = 600;
    job.output_width = 400;
    job.output_height = 400;
    job.crop = true;
    job.zoom = 50.0;
    job.duration = 1.0;

    FfmpegRenderer::new().render(&job).await.unwrap();

    let dims = Prober::new().dimensions(&job.output_path).await.unwrap();
    assert_eq!((dims.width, dims.height), (400, 400));
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_unreadable_source_is_render_failure() {
    let dir = tempfile::tempdir().unwrap();
    let source = fixture_path(dir.path(), "broken.png");
    tokio::fs::write(&source, b"not an image").await.unwrap();

    let job = descriptor(&source, dir.path());
    let err = FfmpegRenderer::new().render(&job).await.unwrap_err();

    assert!(err.diagnostics().is_some());
    assert!(!job.output_path.exists());
}
