//! Entry refresh seam, outcomes, and the HTTP refresher
//!
//! A refresher updates one entry in place. The cache decides which entries
//! to hand it, bounds each call with a timeout, and collects the outcomes
//! into a `RefreshReport`.

use async_trait::async_trait;
use reqwest::Url;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::entry::CacheEntry;

/// Refreshes a single cache entry
#[async_trait]
pub trait EntryRefresher: Send + Sync {
    /// Update `entry` in place. On error the stored entry is left untouched.
    async fn refresh(&self, name: &str, entry: &mut CacheEntry) -> Result<(), RefreshError>;
}

/// Why a single entry failed to refresh
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Refresh timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Refresh cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// A failed entry refresh, tagged with the entry name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to refresh cache entry '{name}': {error}")]
pub struct RefreshFailure {
    pub name: String,
    #[source]
    pub error: RefreshError,
}

/// Outcome of one refresh batch
///
/// `succeeded + failed() + skipped` always equals the number of entries the
/// cache held when the batch started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub succeeded: usize,
    pub skipped: usize,
    pub failures: Vec<RefreshFailure>,
}

impl RefreshReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed()
    }

    /// True when no entry failed
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failure for the named entry, if it failed
    pub fn failure(&self, name: &str) -> Option<&RefreshFailure> {
        self.failures.iter().find(|f| f.name == name)
    }

    /// Record the totals on a span declaring `refresh.total.*` fields
    pub fn record_on(&self, span: &tracing::Span) {
        span.record("refresh.total.succeeded", self.succeeded as u64);
        span.record("refresh.total.failed", self.failed() as u64);
        span.record("refresh.total.skipped", self.skipped as u64);
    }

    /// Log the batch summary, then each failure individually
    pub fn log_summary(&self) {
        for failure in &self.failures {
            tracing::warn!(
                entry = %failure.name,
                error = %failure.error,
                "failed to refresh cache entry"
            );
        }
        tracing::info!(
            succeeded = self.succeeded,
            skipped = self.skipped,
            failed = self.failed(),
            "cache refresh summary"
        );
    }
}

/// Refresher that fetches properties over HTTP
///
/// `GET <base_url>/<name>` must return a JSON object of string values,
/// which replaces the entry's properties. Each `/`-separated part of the
/// name is percent-encoded as one path segment.
#[derive(Debug, Clone)]
pub struct HttpPropertyRefresher {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPropertyRefresher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url_for(&self, name: &str) -> Result<Url, RefreshError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| RefreshError::Other(format!("invalid properties URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| RefreshError::Other(format!("'{}' cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(name.trim_start_matches('/').split('/'));
        Ok(url)
    }
}

#[async_trait]
impl EntryRefresher for HttpPropertyRefresher {
    async fn refresh(&self, name: &str, entry: &mut CacheEntry) -> Result<(), RefreshError> {
        let response = self
            .client
            .get(self.url_for(name)?)
            .send()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RefreshError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let props: HashMap<String, String> = response
            .json()
            .await
            .map_err(|e| RefreshError::Parse(e.to_string()))?;

        tracing::debug!(entry = %name, props = props.len(), "refreshed cache entry");
        entry.replace_props(props);
        Ok(())
    }
}
