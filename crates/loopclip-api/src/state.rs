//! Application state.

use std::sync::Arc;

use loopclip_media::{Acquirer, AcquirerConfig, SourceAcquirer};
use loopclip_models::AllowList;
use loopclip_queue::Scheduler;

use crate::auth::ApiKeys;
use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub scheduler: Scheduler,
    pub acquirer: Arc<dyn SourceAcquirer>,
    pub allow_list: Arc<AllowList>,
    pub api_keys: Arc<ApiKeys>,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        scheduler: Scheduler,
        acquirer: Arc<dyn SourceAcquirer>,
        allow_list: AllowList,
        api_keys: ApiKeys,
    ) -> Self {
        Self {
            config: Arc::new(config),
            scheduler,
            acquirer,
            allow_list: Arc::new(allow_list),
            api_keys: Arc::new(api_keys),
        }
    }

    /// State with the HTTP acquirer and environment-provided allow-list and keys.
    pub fn from_env(config: ApiConfig, scheduler: Scheduler) -> ApiResult<Self> {
        let acquirer = Acquirer::new(AcquirerConfig {
            cache_dir: config.cache_dir.clone(),
            max_bytes: config.download_max_bytes,
            timeout: config.download_timeout,
        })
        .map_err(|e| ApiError::internal(e.to_string()))?;

        Ok(Self::new(
            config,
            scheduler,
            Arc::new(acquirer),
            AllowList::from_env(),
            ApiKeys::from_env(),
        ))
    }
}
