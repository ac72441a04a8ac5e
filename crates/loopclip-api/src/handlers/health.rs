//! Health check handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use loopclip_queue::QueueStats;

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    pub queue: QueueCheck,
}

#[derive(Serialize)]
pub struct QueueCheck {
    pub backend: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<QueueStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn queue_check(state: &AppState) -> QueueCheck {
    let backend = state.scheduler.backend();
    match state.scheduler.stats().await {
        Ok(stats) => QueueCheck {
            backend,
            stats: Some(stats),
            error: None,
        },
        Err(e) => QueueCheck {
            backend,
            stats: None,
            error: Some(e.to_string()),
        },
    }
}

/// Health check endpoint (liveness probe) with queue depth.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        queue: queue_check(&state).await,
    })
}

/// Readiness check endpoint; unavailable while the queue is unreachable.
pub async fn ready(
    State(state): State<AppState>,
) -> Result<Json<QueueCheck>, (StatusCode, Json<QueueCheck>)> {
    let check = queue_check(&state).await;
    if check.error.is_some() {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(check)))
    } else {
        Ok(Json(check))
    }
}
