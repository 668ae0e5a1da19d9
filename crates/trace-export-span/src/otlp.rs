//! OpenTelemetry emitter.
//!
//! Forwards historical spans to an OTLP collector through the OpenTelemetry
//! SDK, preserving the recorded start/end timestamps and the ids handed out
//! by this crate so parent links survive export.

use std::time::SystemTime;

use opentelemetry::trace::{
    Span as _, SpanContext as OtelSpanContext, SpanId as OtelSpanId, SpanKind, TraceContextExt,
    TraceFlags, TraceId as OtelTraceId, TraceState, Tracer, TracerProvider as _,
};
use opentelemetry::{Context, KeyValue, Value};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use thiserror::Error;

use crate::emitter::SpanEmitter;
use crate::span::{AttributeValue, HistoricalSpan, SpanContext};

/// Service name reported for reconstructed workflow traces.
pub const WORKFLOW_RUN_SERVICE_NAME: &str = "trace-workflow-run";

const TRACER_NAME: &str = "trace-export/workflow_run";

/// OTLP setup and shutdown errors
#[derive(Error, Debug)]
pub enum OtlpError {
    #[error("Failed to build OTLP exporter: {0}")]
    Exporter(String),

    #[error("Failed to shut down tracer provider: {0}")]
    Shutdown(String),
}

/// Emitter backed by an OpenTelemetry SDK tracer.
pub struct OtlpEmitter {
    tracer: SdkTracer,
    provider: SdkTracerProvider,
}

impl std::fmt::Debug for OtlpEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtlpEmitter").finish_non_exhaustive()
    }
}

impl OtlpEmitter {
    /// Connect to a gRPC OTLP collector at `endpoint`.
    ///
    /// Spans are exported by the SDK's batch processor.
    pub fn connect(endpoint: &str) -> Result<Self, OtlpError> {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| OtlpError::Exporter(e.to_string()))?;

        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(
                Resource::builder()
                    .with_service_name(WORKFLOW_RUN_SERVICE_NAME)
                    .build(),
            )
            .build();

        Ok(Self::from_provider(provider))
    }

    /// Wrap an already-configured provider.
    pub fn from_provider(provider: SdkTracerProvider) -> Self {
        let tracer = provider.tracer(TRACER_NAME);
        Self { tracer, provider }
    }

    /// Flush pending spans and shut the provider down.
    pub fn shutdown(&self) -> Result<(), OtlpError> {
        self.provider
            .shutdown()
            .map_err(|e| OtlpError::Shutdown(e.to_string()))
    }

    fn parent_context(parent: Option<&SpanContext>) -> Context {
        match parent {
            Some(p) => Context::new().with_remote_span_context(OtelSpanContext::new(
                OtelTraceId::from_bytes(p.trace_id.0.to_be_bytes()),
                OtelSpanId::from_bytes(p.span_id.0.to_be_bytes()),
                TraceFlags::SAMPLED,
                true,
                TraceState::default(),
            )),
            None => Context::new(),
        }
    }
}

fn to_key_value(key: String, value: AttributeValue) -> KeyValue {
    let value = match value {
        AttributeValue::Int(v) => Value::I64(v),
        AttributeValue::Str(v) => Value::from(v),
    };
    KeyValue::new(key, value)
}

impl SpanEmitter for OtlpEmitter {
    fn emit(&self, span: HistoricalSpan, parent: Option<&SpanContext>) -> SpanContext {
        let ctx = SpanContext::child_of(parent);
        let parent_cx = Self::parent_context(parent);

        let attributes: Vec<KeyValue> = span
            .attributes
            .into_iter()
            .map(|(k, v)| to_key_value(k, v))
            .collect();

        let mut otel_span = self
            .tracer
            .span_builder(span.name)
            .with_kind(SpanKind::Internal)
            .with_trace_id(OtelTraceId::from_bytes(ctx.trace_id.0.to_be_bytes()))
            .with_span_id(OtelSpanId::from_bytes(ctx.span_id.0.to_be_bytes()))
            .with_start_time(SystemTime::from(span.start))
            .with_attributes(attributes)
            .start_with_context(&self.tracer, &parent_cx);
        otel_span.end_with_timestamp(SystemTime::from(span.end));

        ctx
    }
}
