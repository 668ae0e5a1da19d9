//! Logging bootstrap and span sink selection

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trace_export_span::{LogEmitter, SpanEmitter};

#[cfg(feature = "otlp")]
use trace_export_span::otlp::OtlpEmitter;

use crate::config::{ConfigError, ServiceConfig};

/// Install the JSON log subscriber, filtered by `RUST_LOG` (default `info`)
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Where reconstructed spans go
pub struct SpanSink {
    emitter: Arc<dyn SpanEmitter>,
    #[cfg(feature = "otlp")]
    otlp: Option<Arc<OtlpEmitter>>,
}

impl SpanSink {
    /// Sink that logs every span
    pub fn log() -> Self {
        Self {
            emitter: Arc::new(LogEmitter::new()),
            #[cfg(feature = "otlp")]
            otlp: None,
        }
    }

    /// Pick the sink for `config`: OTLP when an endpoint is set, logs otherwise
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ConfigError> {
        match config.otlp_endpoint.as_deref() {
            None => Ok(Self::log()),
            Some(endpoint) => Self::otlp(endpoint),
        }
    }

    #[cfg(feature = "otlp")]
    fn otlp(endpoint: &str) -> Result<Self, ConfigError> {
        let emitter = Arc::new(
            OtlpEmitter::connect(endpoint).map_err(|e| ConfigError::Exporter(e.to_string()))?,
        );
        tracing::info!(endpoint = %endpoint, "exporting workflow traces over OTLP");
        Ok(Self {
            emitter: emitter.clone(),
            otlp: Some(emitter),
        })
    }

    #[cfg(not(feature = "otlp"))]
    fn otlp(endpoint: &str) -> Result<Self, ConfigError> {
        tracing::warn!(
            endpoint = %endpoint,
            "built without the otlp feature, logging workflow traces instead"
        );
        Ok(Self::log())
    }

    pub fn emitter(&self) -> Arc<dyn SpanEmitter> {
        self.emitter.clone()
    }

    /// Flush and close the exporter, if any
    pub fn shutdown(&self) {
        #[cfg(feature = "otlp")]
        {
            if let Some(otlp) = &self.otlp {
                if let Err(e) = otlp.shutdown() {
                    tracing::warn!("Failed to shut down span exporter: {}", e);
                }
            }
        }
    }
}
