//! Axum HTTP intake for loopclip.
//!
//! This crate provides:
//! - `POST /create-video`: validate, acquire and enqueue a render job
//! - API-key authentication mapped to output subdirectories
//! - Static serving of rendered artifacts under `/videos`
//! - Health, readiness and Prometheus metrics endpoints

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use auth::{ApiClient, ApiKeys};
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
