//! Wiring of the reconstructor and property cache from configuration

use async_trait::async_trait;
use std::sync::Arc;
use trace_export_cache::{
    CacheEntry, EntryRefresher, HttpPropertyRefresher, PropertyCache, RefreshError,
};
use trace_export_github::{GithubJobsClient, Reconstructor};
use trace_export_span::SpanEmitter;

use crate::config::ServiceConfig;
use crate::handler::AppState;

/// Refresher used when no property source is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSourceRefresher;

#[async_trait]
impl EntryRefresher for NoSourceRefresher {
    async fn refresh(&self, _name: &str, _entry: &mut CacheEntry) -> Result<(), RefreshError> {
        Err(RefreshError::Other(
            "no property source configured (set PROPERTIES_URL)".to_string(),
        ))
    }
}

/// Build the shared application state
pub fn build_state(config: &ServiceConfig, emitter: Arc<dyn SpanEmitter>) -> AppState {
    let mut client = GithubJobsClient::new()
        .with_timeout(config.jobs_fetch_timeout())
        .with_api_base(config.github_api_url.clone());
    if let Some(token) = &config.github_token {
        client = client.with_token(token.clone());
    }
    let reconstructor = Reconstructor::new(emitter, Arc::new(client));

    let refresher: Arc<dyn EntryRefresher> = match &config.properties_url {
        Some(url) => Arc::new(HttpPropertyRefresher::new(url.clone())),
        None => Arc::new(NoSourceRefresher),
    };
    let cache = PropertyCache::new(refresher)
        .with_expire_after(config.cache_expire_after())
        .with_refresh_timeout(config.cache_refresh_timeout());

    AppState::new(reconstructor, Arc::new(cache))
}
