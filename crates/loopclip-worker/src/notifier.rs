//! Webhook delivery for finished jobs.

use std::time::Duration;

use loopclip_models::{JobDescriptor, WebhookPayload};
use tracing::{debug, info};

use crate::error::{WorkerError, WorkerResult};

/// Default webhook timeout.
pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// How rendered artifacts are addressed from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierConfig {
    /// `http` or `https`
    pub public_scheme: String,
    /// Port appended to the request origin; omitted when unset
    pub public_port: Option<u16>,
    pub timeout: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            public_scheme: "http".to_string(),
            public_port: None,
            timeout: DEFAULT_WEBHOOK_TIMEOUT,
        }
    }
}

impl NotifierConfig {
    pub fn from_env() -> Self {
        Self {
            public_scheme: std::env::var("PUBLIC_SCHEME").unwrap_or_else(|_| "http".to_string()),
            public_port: std::env::var("PUBLIC_PORT").ok().and_then(|s| s.parse().ok()),
            timeout: std::env::var("WEBHOOK_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_WEBHOOK_TIMEOUT),
        }
    }
}

/// Absolute URL of a rendered artifact.
pub fn artifact_url(scheme: &str, origin: &str, port: Option<u16>, public_path: &str) -> String {
    let path = public_path.trim_start_matches('/');
    match port {
        Some(port) => format!("{}://{}:{}/{}", scheme, origin, port, path),
        None => format!("{}://{}/{}", scheme, origin, path),
    }
}

/// Posts completion payloads to caller webhooks.
#[derive(Debug, Clone)]
pub struct Notifier {
    client: reqwest::Client,
    config: NotifierConfig,
}

impl Notifier {
    pub fn new(config: NotifierConfig) -> WorkerResult<Self> {
        // The webhook host was allow-listed; where it redirects to was not.
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WorkerError::config_error(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn payload(&self, job: &JobDescriptor) -> WebhookPayload {
        WebhookPayload {
            record_id: job.record_id.clone(),
            filename: artifact_url(
                &self.config.public_scheme,
                &job.request_origin,
                self.config.public_port,
                &job.public_path,
            ),
        }
    }

    /// Deliver the completion payload if the job has a webhook.
    ///
    /// Returns the delivered payload, or `None` when there was nothing to notify.
    pub async fn notify(&self, job: &JobDescriptor) -> WorkerResult<Option<WebhookPayload>> {
        let Some(webhook_url) = job.webhook_url.as_deref() else {
            debug!(job_key = %job.key, "No webhook configured, skipping notification");
            return Ok(None);
        };

        let payload = self.payload(job);

        let response = self
            .client
            .post(webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    WorkerError::notification_failed(format!(
                        "timed out after {}s",
                        self.config.timeout.as_secs()
                    ))
                } else {
                    WorkerError::notification_failed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WorkerError::notification_failed(format!(
                "webhook responded with HTTP {}",
                status
            )));
        }

        info!(
            job_key = %job.key,
            record_id = %job.record_id,
            url = %payload.filename,
            "Webhook delivered"
        );
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::descriptor;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_artifact_url() {
        assert_eq!(
            artifact_url("https", "api.example.com", Some(8443), "videos/team/a.mp4"),
            "https://api.example.com:8443/videos/team/a.mp4"
        );
        assert_eq!(
            artifact_url("http", "api.example.com", None, "/videos/a.mp4"),
            "http://api.example.com/videos/a.mp4"
        );
    }

    #[tokio::test]
    async fn test_posts_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json(serde_json::json!({
                "record_id": "rec1",
                "filename": "https://api.example.com:8443/videos/team/a.mp4"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut job = descriptor("a.mp4");
        job.webhook_url = Some(format!("{}/hook", server.uri()));

        let notifier = Notifier::new(NotifierConfig {
            public_scheme: "https".to_string(),
            public_port: Some(8443),
            ..NotifierConfig::default()
        })
        .unwrap();

        let payload = notifier.notify(&job).await.unwrap().unwrap();
        assert_eq!(payload.record_id, "rec1");
    }

    #[tokio::test]
    async fn test_missing_webhook_is_not_an_error() {
        let notifier = Notifier::new(NotifierConfig::default()).unwrap();
        let job = descriptor("a.mp4");
        assert!(notifier.notify(&job).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_2xx_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let mut job = descriptor("a.mp4");
        job.webhook_url = Some(server.uri());

        let err = Notifier::new(NotifierConfig::default())
            .unwrap()
            .notify(&job)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::NotificationFailed(_)));
        assert!(err.to_string().contains("502"));
    }

    #[tokio::test]
    async fn test_redirect_is_a_delivery_failure() {
        let internal = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&internal)
            .await;

        let hook = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(307)
                    .insert_header("location", format!("{}/admin", internal.uri()).as_str()),
            )
            .mount(&hook)
            .await;

        let mut job = descriptor("a.mp4");
        job.webhook_url = Some(format!("{}/hook", hook.uri()));

        let err = Notifier::new(NotifierConfig::default())
            .unwrap()
            .notify(&job)
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::NotificationFailed(_)));
        assert!(err.to_string().contains("307"));
        assert!(internal.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_slow_webhook_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let mut job = descriptor("a.mp4");
        job.webhook_url = Some(server.uri());

        let notifier = Notifier::new(NotifierConfig {
            timeout: Duration::from_millis(200),
            ..NotifierConfig::default()
        })
        .unwrap();

        let err = notifier.notify(&job).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
