//! Request validation: structural schema first, then the host allow-list.
//!
//! Validation is side-effect free and fails fast on the first violation.
//! Messages are prefixed so callers can tell a malformed request
//! (`schema violation: ...`) from one rejected by the allow-list
//! (`disallowed host: ...`). Only the latter is worth retrying once the
//! allow-list changes.

use std::collections::HashSet;
use std::net::IpAddr;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;
use url::{Host, Url};
use validator::Validate;

use crate::request::{JobRequest, FIELD_ORDER};

/// Environment variable prefix for region-tagged IP allow-lists,
/// e.g. `ALLOWED_IPS_EU=203.0.113.7,203.0.113.8`.
pub const ALLOWED_IPS_PREFIX: &str = "ALLOWED_IPS_";

/// Why a request was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Wrong types, missing fields, out-of-range numbers or malformed strings.
    #[error("schema violation: {0}")]
    Schema(String),

    /// Well-formed URL whose host is not on the allow-list.
    #[error("disallowed host: {0}")]
    DisallowedHost(String),
}

impl ValidationError {
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn disallowed_host(msg: impl Into<String>) -> Self {
        Self::DisallowedHost(msg.into())
    }

    /// True when the failure came from the allow-list stage.
    pub fn is_disallowed_host(&self) -> bool {
        matches!(self, ValidationError::DisallowedHost(_))
    }
}

/// Boolean verdict plus a single human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self { valid: true, reason: None }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

impl<T> From<&Result<T, ValidationError>> for ValidationResult {
    fn from(result: &Result<T, ValidationError>) -> Self {
        match result {
            Ok(_) => Self::valid(),
            Err(e) => Self::invalid(e.to_string()),
        }
    }
}

/// Hosts that input and webhook URLs may point at.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    domains: HashSet<String>,
    ips: HashSet<IpAddr>,
    regions: Vec<String>,
}

impl AllowList {
    /// Create an allow-list from domains and IP literals.
    pub fn new<D, S>(domains: D, ips: impl IntoIterator<Item = IpAddr>) -> Self
    where
        D: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            domains: domains
                .into_iter()
                .map(|d| normalize_domain(d.as_ref()))
                .filter(|d| !d.is_empty())
                .collect(),
            ips: ips.into_iter().collect(),
            regions: Vec::new(),
        }
    }

    /// Create from `ALLOWED_DOMAINS` and every `ALLOWED_IPS_<REGION>` variable.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build from an arbitrary set of key/value pairs.
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut list = Self::default();

        for (key, value) in vars {
            if key == "ALLOWED_DOMAINS" {
                list.domains.extend(
                    split_list(&value)
                        .map(normalize_domain)
                        .filter(|d| !d.is_empty()),
                );
            } else if let Some(region) = key.strip_prefix(ALLOWED_IPS_PREFIX) {
                list.regions.push(region.to_lowercase());
                for entry in split_list(&value) {
                    match entry.parse::<IpAddr>() {
                        Ok(ip) => {
                            list.ips.insert(ip);
                        }
                        Err(_) => warn!(region = %region, entry = %entry, "Ignoring malformed allow-list IP"),
                    }
                }
            }
        }

        list.regions.sort();
        list
    }

    /// Region tags that contributed IPs.
    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    pub fn ip_count(&self) -> usize {
        self.ips.len()
    }

    /// Check a parsed host against the list.
    ///
    /// Domains match exactly or as a parent (`cdn.example.com` is allowed by
    /// `example.com`). IP literals only match the configured IP set.
    pub fn allows_host(&self, host: &Host<&str>) -> bool {
        match host {
            Host::Ipv4(ip) => self.ips.contains(&IpAddr::V4(*ip)),
            Host::Ipv6(ip) => self.ips.contains(&IpAddr::V6(*ip)),
            Host::Domain(domain) => {
                let domain = normalize_domain(domain);
                if self.domains.contains(&domain) {
                    return true;
                }
                self.domains
                    .iter()
                    .any(|allowed| domain.ends_with(&format!(".{}", allowed)))
            }
        }
    }

    /// Check that the URL in `field` points at an allowed host.
    pub fn check_url(&self, field: &str, raw: &str) -> Result<(), ValidationError> {
        let parsed = Url::parse(raw)
            .map_err(|e| ValidationError::schema(format!("{} is not a valid URL: {}", field, e)))?;

        let host = parsed
            .host()
            .ok_or_else(|| ValidationError::schema(format!("{} must include a host", field)))?;

        if self.allows_host(&host) {
            Ok(())
        } else {
            Err(ValidationError::disallowed_host(format!(
                "{} host '{}' is not in the allow-list",
                field, host
            )))
        }
    }
}

/// Validate a raw request object and return the typed request.
pub fn validate_request(raw: &Value, allow_list: &AllowList) -> Result<JobRequest, ValidationError> {
    if !raw.is_object() {
        return Err(ValidationError::schema("request body must be a JSON object"));
    }

    let request: JobRequest =
        serde_json::from_value(raw.clone()).map_err(|e| ValidationError::schema(e.to_string()))?;

    check_schema(&request)?;

    allow_list.check_url("input_url", &request.input_url)?;
    if let Some(webhook_url) = &request.webhook_url {
        allow_list.check_url("webhook_url", webhook_url)?;
    }

    Ok(request)
}

/// Validate and reduce to a [`ValidationResult`].
pub fn check_request(raw: &Value, allow_list: &AllowList) -> ValidationResult {
    ValidationResult::from(&validate_request(raw, allow_list))
}

/// Run the derive-based field checks and report the first failure in
/// declaration order.
fn check_schema(request: &JobRequest) -> Result<(), ValidationError> {
    let Err(errors) = request.validate() else {
        return Ok(());
    };

    let fields = errors.field_errors();
    for name in FIELD_ORDER {
        if let Some(first) = fields.get(*name).and_then(|errs| errs.first()) {
            let message = first
                .message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("{} is invalid", name));
            let message = if message.starts_with(name) {
                message
            } else {
                format!("{}: {}", name, message)
            };
            return Err(ValidationError::schema(message));
        }
    }

    Err(ValidationError::schema(errors.to_string()))
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn allow_list() -> AllowList {
        AllowList::new(["example.com"], ["203.0.113.7".parse().unwrap()])
    }

    fn body() -> Value {
        json!({
            "record_id": "rec42",
            "input_url": "https://media.example.com/still.jpg",
            "webhook_url": "https://hooks.example.com/done",
            "framerate": 30,
            "duration": 5,
            "cache": false,
            "zoom": 0,
            "crop": false,
            "output_width": 1920,
            "output_height": 1080
        })
    }

    #[test]
    fn test_valid_request() {
        let request = validate_request(&body(), &allow_list()).unwrap();
        assert_eq!(request.record_id, "rec42");
        assert_eq!(request.output_width, 1920);
        assert_eq!(check_request(&body(), &allow_list()), ValidationResult::valid());
    }

    #[test]
    fn test_rejects_bad_record_id() {
        let mut raw = body();
        raw["record_id"] = json!("bad id!");

        let err = validate_request(&raw, &allow_list()).unwrap_err();
        assert!(matches!(err, ValidationError::Schema(_)));
        assert!(err.to_string().contains("record_id"));
    }

    #[test]
    fn test_rejects_long_duration() {
        let mut raw = body();
        raw["duration"] = json!(61);

        let err = validate_request(&raw, &allow_list()).unwrap_err();
        assert!(err.to_string().starts_with("schema violation: duration"));
    }

    #[test]
    fn test_rejects_zoom_out_of_range() {
        let mut raw = body();
        raw["zoom"] = json!(150);

        let result = check_request(&raw, &allow_list());
        assert!(!result.valid);
        assert!(result.reason.unwrap().contains("zoom"));
    }

    #[test]
    fn test_rejects_unlisted_input_host() {
        let mut raw = body();
        raw["input_url"] = json!("https://evil.test/still.jpg");

        let err = validate_request(&raw, &allow_list()).unwrap_err();
        assert!(err.is_disallowed_host());
        assert!(err.to_string().starts_with("disallowed host: input_url"));
    }

    #[test]
    fn test_rejects_unlisted_webhook_host() {
        let mut raw = body();
        raw["webhook_url"] = json!("http://10.0.0.1/hook");

        let err = validate_request(&raw, &allow_list()).unwrap_err();
        assert!(err.is_disallowed_host());
        assert!(err.to_string().contains("webhook_url"));
    }

    #[test]
    fn test_schema_checked_before_hosts() {
        let mut raw = body();
        raw["input_url"] = json!("https://evil.test/still.jpg");
        raw["duration"] = json!(0);

        let err = validate_request(&raw, &allow_list()).unwrap_err();
        assert!(matches!(err, ValidationError::Schema(_)));
    }

    #[test]
    fn test_missing_and_mistyped_fields() {
        let mut raw = body();
        raw.as_object_mut().unwrap().remove("record_id");
        let err = validate_request(&raw, &allow_list()).unwrap_err();
        assert!(err.to_string().contains("record_id"));

        let mut raw = body();
        raw["output_width"] = json!("wide");
        assert!(matches!(
            validate_request(&raw, &allow_list()),
            Err(ValidationError::Schema(_))
        ));

        let mut raw = body();
        raw["output_height"] = json!(0);
        assert!(validate_request(&raw, &allow_list()).is_err());

        tokio_test::assert_err!(validate_request(&json!([1, 2]), &allow_list()));
    }

    #[test]
    fn test_unsupported_scheme_is_schema_violation() {
        let mut raw = body();
        raw["input_url"] = json!("file:///etc/passwd");

        let err = validate_request(&raw, &allow_list()).unwrap_err();
        assert!(matches!(err, ValidationError::Schema(_)));
    }

    #[test]
    fn test_validation_is_idempotent() {
        let mut raw = body();
        raw["record_id"] = json!("bad id!");
        raw["duration"] = json!(90);
        raw["zoom"] = json!(-300);

        let first = check_request(&raw, &allow_list());
        let second = check_request(&raw, &allow_list());
        assert_eq!(first, second);
        assert!(first.reason.unwrap().contains("record_id"));
    }

    #[test]
    fn test_ip_literal_and_subdomain_matching() {
        let list = allow_list();
        assert!(list.check_url("input_url", "http://203.0.113.7/a.png").is_ok());
        assert!(list.check_url("input_url", "http://203.0.113.8/a.png").is_err());
        assert!(list.check_url("input_url", "https://EXAMPLE.com/a.png").is_ok());
        assert!(list.check_url("input_url", "https://deep.cdn.example.com/a.png").is_ok());
        assert!(list.check_url("input_url", "https://notexample.com/a.png").is_err());
    }

    #[test]
    fn test_from_vars_reads_domains_and_regions() {
        let list = AllowList::from_vars(vec![
            ("ALLOWED_DOMAINS".to_string(), "example.com, media.test ,".to_string()),
            ("ALLOWED_IPS_EU".to_string(), "198.51.100.1,garbage".to_string()),
            ("ALLOWED_IPS_US".to_string(), "2001:db8::1".to_string()),
            ("UNRELATED".to_string(), "1.1.1.1".to_string()),
        ]);

        assert_eq!(list.domain_count(), 2);
        assert_eq!(list.ip_count(), 2);
        assert_eq!(list.regions(), &["eu".to_string(), "us".to_string()]);
        assert!(list.check_url("input_url", "http://[2001:db8::1]/a.png").is_ok());
        assert!(list.check_url("input_url", "http://1.1.1.1/a.png").is_err());
    }
}
