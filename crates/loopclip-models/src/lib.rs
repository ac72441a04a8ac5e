//! Shared data models for loopclip.
//!
//! This crate provides Serde-serializable types for:
//! - Render requests and their validation against the host allow-list
//! - Job descriptors, keys and lifecycle states
//! - Job outcomes and webhook payloads

pub mod job;
pub mod request;
pub mod validation;

// Re-export common types
pub use job::{
    JobDescriptor, JobKey, JobOutcome, JobState, OutputPlacement, SourceInfo, WebhookPayload,
    OUTPUT_EXTENSION,
};
pub use request::{JobRequest, MAX_DURATION_SECS, ZOOM_SCALE};
pub use validation::{check_request, validate_request, AllowList, ValidationError, ValidationResult};
