//! Service configuration
//!
//! Every setting can come from a flag or from the environment, flags first.

use clap::Args;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use trace_export_github::client::DEFAULT_API_BASE;

/// Settings for the `serve` command
#[derive(Debug, Clone, Args)]
pub struct ServiceConfig {
    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080", env = "PORT")]
    pub port: u16,

    /// OTLP collector for reconstructed spans; spans are logged when unset
    #[arg(long, env = "OTEL_EXPORTER_OTLP_TRACES_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Token for the GitHub jobs API
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// GitHub API origin; the token is only sent to jobs URLs on it
    #[arg(long, default_value = DEFAULT_API_BASE, env = "GITHUB_API_URL")]
    pub github_api_url: String,

    /// Timeout for one jobs API request, in milliseconds
    #[arg(long, default_value = "10000", env = "JOBS_FETCH_TIMEOUT_MS")]
    pub jobs_fetch_timeout_ms: u64,

    /// Age after which a cached property set is refreshed, in seconds
    #[arg(long, default_value = "10", env = "CACHE_EXPIRE_AFTER_SECS")]
    pub cache_expire_after_secs: u64,

    /// Pause between scheduled cache refreshes, in seconds
    #[arg(long, default_value = "30", env = "CACHE_REFRESH_INTERVAL_SECS")]
    pub cache_refresh_interval_secs: u64,

    /// Timeout for refreshing one cache entry, in milliseconds
    #[arg(long, default_value = "5000", env = "CACHE_REFRESH_TIMEOUT_MS")]
    pub cache_refresh_timeout_ms: u64,

    /// Base URL of the property source; scheduled refresh is off when unset
    #[arg(long, env = "PROPERTIES_URL")]
    pub properties_url: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            otlp_endpoint: None,
            github_token: None,
            github_api_url: DEFAULT_API_BASE.to_string(),
            jobs_fetch_timeout_ms: 10_000,
            cache_expire_after_secs: 10,
            cache_refresh_interval_secs: 30,
            cache_refresh_timeout_ms: 5_000,
            properties_url: None,
        }
    }
}

/// Configuration and startup errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Invalid listen address: {0}")]
    InvalidAddress(String),

    #[error("Span exporter setup failed: {0}")]
    Exporter(String),
}

impl ServiceConfig {
    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("jobs_fetch_timeout_ms", self.jobs_fetch_timeout_ms),
            ("cache_expire_after_secs", self.cache_expire_after_secs),
            ("cache_refresh_interval_secs", self.cache_refresh_interval_secs),
            ("cache_refresh_timeout_ms", self.cache_refresh_timeout_ms),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        let urls = [
            ("properties_url", self.properties_url.as_deref()),
            ("github_api_url", Some(self.github_api_url.as_str())),
        ];
        for (field, url) in urls {
            if let Some(url) = url {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::InvalidValue {
                        field,
                        reason: format!("'{}' is not an http(s) URL", url),
                    });
                }
            }
        }

        self.listen_addr().map(|_| ())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidAddress(e.to_string()))
    }

    pub fn jobs_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.jobs_fetch_timeout_ms)
    }

    pub fn cache_expire_after(&self) -> Duration {
        Duration::from_secs(self.cache_expire_after_secs)
    }

    pub fn cache_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.cache_refresh_interval_secs)
    }

    pub fn cache_refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_refresh_timeout_ms)
    }
}
