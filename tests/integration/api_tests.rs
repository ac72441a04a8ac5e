//! API integration tests.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use loopclip_api::{create_router, ApiConfig, ApiKeys, AppState};
use loopclip_media::{MediaError, MediaResult, SourceAcquirer};
use loopclip_models::{AllowList, SourceInfo};
use loopclip_queue::{MemoryJobStore, RetryPolicy, Scheduler};

struct NoSource;

#[async_trait]
impl SourceAcquirer for NoSource {
    async fn acquire(&self, _url: &str) -> MediaResult<SourceInfo> {
        Err(MediaError::download_failed("no network in tests"))
    }
}

fn create_test_router(cors_origins: Vec<String>) -> axum::Router {
    let config = ApiConfig {
        cors_origins,
        ..ApiConfig::default()
    };
    let scheduler = Scheduler::new(Arc::new(MemoryJobStore::default()), RetryPolicy::default());
    let state = AppState::new(
        config,
        scheduler,
        Arc::new(NoSource),
        AllowList::default(),
        ApiKeys::parse("k1:acme"),
    );
    create_router(state, None)
}

/// Test CORS preflight for the intake endpoint.
#[tokio::test]
async fn test_cors_preflight() {
    let app = create_test_router(vec!["http://localhost:3000".to_string()]);

    let response = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/create-video")
                .header("Origin", "http://localhost:3000")
                .header("Access-Control-Request-Method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status() == StatusCode::OK || response.status() == StatusCode::NO_CONTENT);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "http://localhost:3000"
    );
}

/// Test security and request-id headers.
#[tokio::test]
async fn test_security_headers() {
    let app = create_test_router(vec!["*".to_string()]);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("X-Request-ID", "req-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let headers = response.headers();
    assert!(headers.contains_key("X-Content-Type-Options"));
    assert!(headers.contains_key("X-Frame-Options"));
    assert_eq!(headers["X-Request-ID"], "req-42");
}

/// Test the body size limit.
#[tokio::test]
async fn test_oversized_body_rejected() {
    let app = create_test_router(vec!["*".to_string()]);
    let body = "x".repeat(ApiConfig::default().max_body_size + 1);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/create-video")
                .header("x-api-key", "k1")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
