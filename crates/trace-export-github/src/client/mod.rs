//! Jobs fetching
//!
//! `JobsFetcher` is the seam the reconstructor calls to list a run's jobs.
//! `GithubJobsClient` talks to the GitHub REST API; `StaticJobsFetcher`
//! serves a fixed response (replays from disk, tests).

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::Url;
use std::time::Duration;

use crate::contracts::Jobs;

/// Default request timeout for a jobs fetch
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// API origin the token is scoped to unless configured otherwise
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

const GITHUB_MEDIA_TYPE: &str = "application/vnd.github+json";

/// Source of a run's jobs
#[async_trait]
pub trait JobsFetcher: Send + Sync {
    /// Fetch and decode the jobs listed at `url`
    async fn fetch_jobs(&self, url: &str) -> Result<Jobs, FetchError>;
}

/// GitHub REST client for the jobs endpoint
///
/// The jobs URL comes from the webhook body, so the token is only sent to
/// URLs on the configured API origin. Other URLs are fetched anonymously.
#[derive(Debug, Clone)]
pub struct GithubJobsClient {
    client: reqwest::Client,
    token: Option<String>,
    api_base: String,
    timeout: Duration,
}

impl Default for GithubJobsClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GithubJobsClient {
    /// Create new client
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            token: None,
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    /// Authenticate requests with a bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Origin allowed to receive the token (GitHub Enterprise, tests)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Token to send to `url`, if its origin is the API origin
    fn token_for(&self, url: &Url) -> Option<&str> {
        let token = self.token.as_deref()?;
        match Url::parse(&self.api_base) {
            Ok(base) if base.origin() == url.origin() => Some(token),
            Ok(_) => {
                tracing::warn!(
                    jobs_url = %url,
                    api_base = %self.api_base,
                    "jobs URL is not on the GitHub API origin, fetching without credentials"
                );
                None
            }
            Err(e) => {
                tracing::warn!("Invalid GitHub API base '{}': {}", self.api_base, e);
                None
            }
        }
    }
}

#[async_trait]
impl JobsFetcher for GithubJobsClient {
    async fn fetch_jobs(&self, url: &str) -> Result<Jobs, FetchError> {
        let url = Url::parse(url)
            .map_err(|e| FetchError::Network(format!("invalid jobs URL '{}': {}", url, e)))?;
        let token = self.token_for(&url);

        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, GITHUB_MEDIA_TYPE)
            .header(USER_AGENT, concat!("trace-export/", env!("CARGO_PKG_VERSION")))
            .timeout(self.timeout);

        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

/// Fetcher that always returns the same jobs, whatever the URL
#[derive(Debug, Clone, Default)]
pub struct StaticJobsFetcher {
    jobs: Jobs,
}

impl StaticJobsFetcher {
    pub fn new(jobs: Jobs) -> Self {
        Self { jobs }
    }

    /// Decode a jobs API response body
    pub fn from_json(json: &str) -> Result<Self, FetchError> {
        let jobs = serde_json::from_str(json).map_err(|e| FetchError::Decode(e.to_string()))?;
        Ok(Self::new(jobs))
    }
}

#[async_trait]
impl JobsFetcher for StaticJobsFetcher {
    async fn fetch_jobs(&self, _url: &str) -> Result<Jobs, FetchError> {
        Ok(self.jobs.clone())
    }
}

/// Jobs fetch errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl FetchError {
    /// Whether the response arrived but could not be decoded
    pub fn is_decode(&self) -> bool {
        matches!(self, FetchError::Decode(_))
    }
}
