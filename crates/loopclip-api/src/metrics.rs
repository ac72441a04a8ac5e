//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "loopclip_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "loopclip_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "loopclip_http_requests_in_flight";

    // Intake metrics
    pub const REQUESTS_REJECTED_TOTAL: &str = "loopclip_requests_rejected_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a render request refused before enqueue.
pub fn record_request_rejected(stage: &'static str) {
    counter!(names::REQUESTS_REJECTED_TOTAL, "stage" => stage).increment(1);
}

/// Sanitize path for metrics labels.
///
/// Artifact paths carry random filenames, so they collapse to one label.
fn sanitize_path(path: &str) -> String {
    if path.starts_with("/videos/") {
        "/videos/:file".to_string()
    } else {
        path.to_string()
    }
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/videos/acme/0f8fad5bd9cb469fa16570867728950e.mp4"),
            "/videos/:file"
        );
        assert_eq!(sanitize_path("/create-video"), "/create-video");
    }
}
