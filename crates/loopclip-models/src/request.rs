//! Render request accepted at the intake boundary.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;
use validator::{Validate, ValidationError as FieldError};

/// Longest clip the renderer accepts, in seconds.
pub const MAX_DURATION_SECS: f64 = 60.0;

/// Zoom is expressed on a symmetric -100..=100 scale.
pub const ZOOM_SCALE: f64 = 100.0;

/// Correlation tokens are plain alphanumerics.
pub(crate) static RECORD_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Za-z]+$").unwrap());

/// Fields in the order they are checked. The first failing field wins so
/// repeated validation of the same payload reports the same reason.
pub(crate) const FIELD_ORDER: &[&str] = &[
    "record_id",
    "input_url",
    "webhook_url",
    "framerate",
    "duration",
    "zoom",
    "output_width",
    "output_height",
];

/// A request to render a looped clip from a single source frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct JobRequest {
    /// Caller correlation token, echoed in the webhook payload
    #[validate(regex(path = *RECORD_ID_RE, message = "record_id must match ^[0-9A-Za-z]+$"))]
    pub record_id: String,
    /// Source media location
    #[validate(custom(function = "validate_http_url"))]
    pub input_url: String,
    /// Optional completion callback
    #[serde(default)]
    #[validate(custom(function = "validate_http_url"))]
    pub webhook_url: Option<String>,
    /// Output frames per second
    #[validate(range(exclusive_min = 0.0, message = "framerate must be greater than 0"))]
    pub framerate: f64,
    /// Clip length in seconds
    #[validate(range(
        exclusive_min = 0.0,
        max = 60.0,
        message = "duration must be greater than 0 and at most 60 seconds"
    ))]
    pub duration: f64,
    /// Reserved for result caching; accepted and carried but not acted on
    #[serde(default)]
    pub cache: bool,
    /// Zoom speed on the -100..=100 scale, 0 disables zoom
    #[serde(default)]
    #[validate(range(min = -100.0, max = 100.0, message = "zoom must be between -100 and 100"))]
    pub zoom: Option<f64>,
    /// Crop instead of letterboxing when aspect ratios differ
    #[serde(default)]
    pub crop: bool,
    /// Output width in pixels
    #[validate(range(min = 1, message = "output_width must be a positive integer"))]
    pub output_width: u32,
    /// Output height in pixels
    #[validate(range(min = 1, message = "output_height must be a positive integer"))]
    pub output_height: u32,
}

impl JobRequest {
    /// Zoom value to render with, falling back to the configured default.
    pub fn effective_zoom(&self, default_zoom: f64) -> f64 {
        self.zoom.unwrap_or(default_zoom)
    }
}

/// Structural URL check: must parse and use http or https.
///
/// Host allow-listing happens in a later stage so its failures can be told
/// apart from malformed input.
fn validate_http_url(value: &str) -> Result<(), FieldError> {
    let parsed = Url::parse(value).map_err(|e| {
        FieldError::new("url").with_message(Cow::Owned(format!("'{}' is not a valid URL: {}", value, e)))
    })?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(FieldError::new("url_scheme").with_message(Cow::Owned(format!(
                "URL scheme '{}' is not supported, use http or https",
                scheme
            ))))
        }
    }

    if parsed.host().is_none() {
        return Err(FieldError::new("url_host").with_message(Cow::Borrowed("URL must include a host")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> JobRequest {
        JobRequest {
            record_id: "abc123".to_string(),
            input_url: "https://media.example.com/frame.png".to_string(),
            webhook_url: None,
            framerate: 30.0,
            duration: 5.0,
            cache: false,
            zoom: None,
            crop: false,
            output_width: 1920,
            output_height: 1080,
        }
    }

    #[test]
    fn test_valid_request_passes() {
        tokio_test::assert_ok!(request().validate());
    }

    #[test]
    fn test_duration_bounds() {
        let mut req = request();
        req.duration = 60.0;
        assert!(req.validate().is_ok());

        req.duration = 61.0;
        tokio_test::assert_err!(req.validate());

        req.duration = 0.0;
        tokio_test::assert_err!(req.validate());
    }

    #[test]
    fn test_zoom_bounds() {
        let mut req = request();
        req.zoom = Some(-100.0);
        assert!(req.validate().is_ok());

        req.zoom = Some(150.0);
        tokio_test::assert_err!(req.validate());
    }

    #[test]
    fn test_effective_zoom_uses_default() {
        let mut req = request();
        assert_eq!(req.effective_zoom(10.0), 10.0);

        req.zoom = Some(-20.0);
        assert_eq!(req.effective_zoom(10.0), -20.0);
    }

    #[test]
    fn test_http_url_check() {
        assert!(validate_http_url("https://example.com/a.png").is_ok());
        assert!(validate_http_url("ftp://example.com/a.png").is_err());
        assert!(validate_http_url("not a url").is_err());
    }
}
