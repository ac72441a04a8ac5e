//! Render intake handlers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::HOST;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use loopclip_media::remove_quietly;
use loopclip_models::{validate_request, JobDescriptor, JobKey, OutputPlacement};

use crate::auth::ApiClient;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Accepted render job.
#[derive(Debug, Serialize)]
pub struct CreateVideoResponse {
    pub record_id: String,
    pub filename: String,
    pub message: String,
    pub input_height: u32,
    pub input_width: u32,
    pub output_height: u32,
    pub output_width: u32,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Host the caller addressed, without any port.
pub fn request_origin(headers: &HeaderMap) -> String {
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .unwrap_or("localhost");

    if host.starts_with('[') {
        // Bracketed IPv6 literal, possibly followed by a port.
        match host.find(']') {
            Some(end) => host[..=end].to_string(),
            None => host.to_string(),
        }
    } else {
        host.split(':').next().unwrap_or(host).to_string()
    }
}

/// Validate, acquire the source and enqueue a render job.
///
/// Returns as soon as the job is queued; completion is reported through the
/// webhook.
pub async fn create_video(
    State(state): State<AppState>,
    client: ApiClient,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<CreateVideoResponse>> {
    let raw: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("schema violation: invalid JSON body: {}", e)))?;

    let request = validate_request(&raw, &state.allow_list).map_err(|e| {
        metrics::record_request_rejected("validation");
        info!(reason = %e, "Rejected render request");
        ApiError::from(e)
    })?;

    let source = state.acquirer.acquire(&request.input_url).await.map_err(|e| {
        metrics::record_request_rejected("acquisition");
        warn!(record_id = %request.record_id, "Source acquisition failed: {}", e);
        ApiError::from(e)
    })?;

    let key = JobKey::generate();
    let placement = OutputPlacement {
        request_origin: request_origin(&headers),
        output_path: state.config.output_dir.join(&client.subdir).join(key.as_str()),
        public_path: format!("videos/{}/{}", client.subdir, key),
    };
    let descriptor = JobDescriptor::new(
        key.clone(),
        request,
        state.config.default_zoom,
        source,
        placement,
    );

    let response = CreateVideoResponse {
        record_id: descriptor.record_id.clone(),
        filename: key.to_string(),
        message: "Video queued for rendering".to_string(),
        input_height: descriptor.input_height,
        input_width: descriptor.input_width,
        output_height: descriptor.output_height,
        output_width: descriptor.output_width,
    };
    let source_path = descriptor.source_path.clone();

    if let Err(e) = state.scheduler.enqueue(descriptor).await {
        // Nothing will ever render this source.
        remove_quietly(&source_path).await;
        return Err(e.into());
    }

    Ok(Json(response))
}

/// API-key liveness check.
pub async fn validate_key(
    client: Result<ApiClient, ApiError>,
) -> ApiResult<Json<MessageResponse>> {
    let client = client.map_err(|e| ApiError::bad_request(e.to_string()))?;

    Ok(Json(MessageResponse {
        message: format!("API key is valid for '{}'", client.subdir),
    }))
}
