//! API-key authentication.
//!
//! `API_KEYS` maps each key to the output subdirectory its renders land in,
//! e.g. `API_KEYS=k3y1:acme,k3y2:globex`.

use std::collections::HashMap;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tracing::warn;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Key to output-subdirectory mapping.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    keys: HashMap<String, String>,
}

impl ApiKeys {
    pub fn new<I, K, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, S)>,
        K: Into<String>,
        S: Into<String>,
    {
        Self {
            keys: entries
                .into_iter()
                .map(|(k, s)| (k.into(), s.into()))
                .collect(),
        }
    }

    pub fn from_env() -> Self {
        Self::parse(&std::env::var("API_KEYS").unwrap_or_default())
    }

    /// Parse `key:subdir` pairs separated by commas.
    ///
    /// Entries without a usable subdirectory are skipped.
    pub fn parse(raw: &str) -> Self {
        let mut keys = HashMap::new();

        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.split_once(':') {
                Some((key, subdir)) if !key.trim().is_empty() && is_safe_subdir(subdir.trim()) => {
                    keys.insert(key.trim().to_string(), subdir.trim().to_string());
                }
                _ => warn!("Ignoring malformed API_KEYS entry"),
            }
        }

        Self { keys }
    }

    /// Output subdirectory authorized for `key`.
    pub fn subdir_for(&self, key: &str) -> Option<&str> {
        self.keys.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Subdirectories become path segments, so only plain names are accepted.
fn is_safe_subdir(subdir: &str) -> bool {
    !subdir.is_empty()
        && subdir
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Caller authenticated by API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiClient {
    pub subdir: String,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for ApiClient {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing x-api-key header"))?;

        let subdir = state
            .api_keys
            .subdir_for(key)
            .ok_or_else(|| ApiError::unauthorized("Invalid API key"))?;

        Ok(ApiClient {
            subdir: subdir.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_api_keys() {
        let keys = ApiKeys::parse("k1:acme, k2:globex ,bad,k3:../etc,:nokey");

        assert_eq!(keys.len(), 2);
        assert_eq!(keys.subdir_for("k1"), Some("acme"));
        assert_eq!(keys.subdir_for("k2"), Some("globex"));
        assert_eq!(keys.subdir_for("k3"), None);
        assert_eq!(keys.subdir_for("bad"), None);
    }

    #[test]
    fn test_empty_api_keys() {
        assert!(ApiKeys::parse("").is_empty());
    }
}
