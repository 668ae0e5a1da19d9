//! HTTP handler for the trace export service
//!
//! - `POST /webhook`: reconstruct a `workflow_run` delivery into a trace
//! - `GET /health`: liveness
//! - `GET|PUT /api/v1/properties/:name`: read or seed a cached property set
//! - `POST /api/v1/properties/refresh`: refresh every cached property set now

pub mod routes;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use trace_export_cache::{PropertyCache, RefreshReport};
use trace_export_github::{Reconstructor, TraceOutcome};
use uuid::Uuid;

pub use routes::{
    get_properties, handle_webhook, health_check, put_properties, refresh_properties,
};

/// Application state
pub struct AppState {
    pub reconstructor: Reconstructor,
    pub cache: Arc<PropertyCache>,
}

impl AppState {
    pub fn new(reconstructor: Reconstructor, cache: Arc<PropertyCache>) -> Self {
        Self {
            reconstructor,
            cache,
        }
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/webhook", post(handle_webhook))
        .route("/api/v1/properties/refresh", post(refresh_properties))
        .route(
            "/api/v1/properties/:name",
            get(get_properties).put(put_properties),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub request_id: Uuid,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            request_id: Uuid::new_v4(),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(error: ErrorInfo) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            request_id: Uuid::new_v4(),
        }
    }
}

/// Error information for API responses
#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    /// Error code for programmatic handling
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<i64>,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub cached_entries: usize,
}

/// What happened to a webhook delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookResult {
    Skipped {
        run_id: i64,
        action: String,
    },
    Traced {
        run_id: i64,
        spans_emitted: usize,
    },
    /// Some jobs or steps could not be traced; the rest was emitted
    Incomplete {
        run_id: i64,
        spans_emitted: usize,
        errors: Vec<String>,
    },
}

impl From<TraceOutcome> for WebhookResult {
    fn from(outcome: TraceOutcome) -> Self {
        match outcome {
            TraceOutcome::Skipped { run_id, action } => WebhookResult::Skipped { run_id, action },
            TraceOutcome::Traced {
                run_id,
                spans_emitted,
            } => WebhookResult::Traced {
                run_id,
                spans_emitted,
            },
        }
    }
}

/// Summary of a forced cache refresh
#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<FailureSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureSummary {
    pub name: String,
    pub error: String,
}

impl From<&RefreshReport> for RefreshSummary {
    fn from(report: &RefreshReport) -> Self {
        Self {
            succeeded: report.succeeded,
            skipped: report.skipped,
            failed: report.failed(),
            failures: report
                .failures
                .iter()
                .map(|f| FailureSummary {
                    name: f.name.clone(),
                    error: f.error.to_string(),
                })
                .collect(),
        }
    }
}

/// API errors
#[derive(Debug)]
pub enum ApiError {
    /// The request body could not be decoded
    BadRequest(String),
    /// The delivery decoded but cannot be traced
    Unprocessable { message: String, run_id: Option<i64> },
    /// The jobs API failed; the delivery may be retried
    BadGateway { message: String, run_id: Option<i64> },
}

impl ApiError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unprocessable { .. } => "UNPROCESSABLE",
            ApiError::BadGateway { .. } => "UPSTREAM_FAILED",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code().to_string();
        let error_info = match self {
            ApiError::BadRequest(message) => ErrorInfo {
                code,
                message,
                run_id: None,
            },
            ApiError::Unprocessable { message, run_id }
            | ApiError::BadGateway { message, run_id } => ErrorInfo {
                code,
                message,
                run_id,
            },
        };

        (status, Json(ApiResponse::error(error_info))).into_response()
    }
}
