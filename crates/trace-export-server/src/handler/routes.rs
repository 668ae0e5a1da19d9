//! Route handlers

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use trace_export_cache::CacheEntry;
use trace_export_github::{ErrorKind, ReconstructError, TraceOutcome, WorkflowRunPayload};
use tracing::field::Empty;
use tracing::{Instrument, Span};

use super::{ApiError, ApiResponse, AppState, HealthResponse, RefreshSummary, WebhookResult};

/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cached_entries: state.cache.len(),
    })
}

/// POST /webhook
///
/// The body is decoded here rather than through the `Json` extractor so that
/// every undecodable delivery is a 400.
pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<ApiResponse<WebhookResult>>, ApiError> {
    let span = tracing::info_span!(
        "github-webhook",
        run.id = Empty,
        action = Empty,
        outcome = Empty
    );
    process_webhook(&state, &body).instrument(span).await
}

async fn process_webhook(
    state: &AppState,
    body: &[u8],
) -> Result<Json<ApiResponse<WebhookResult>>, ApiError> {
    let span = Span::current();
    let payload: WorkflowRunPayload = serde_json::from_slice(body).map_err(|e| {
        span.record("outcome", "bad_request");
        ApiError::BadRequest(format!("Invalid webhook body: {}", e))
    })?;
    span.record("action", payload.action.as_str());
    if let Some(run) = &payload.workflow_run {
        span.record("run.id", run.id);
    }

    match state.reconstructor.reconstruct(&payload).await {
        Ok(outcome) => {
            span.record("outcome", outcome_name(&outcome));
            tracing::info!(?outcome, "handled workflow run webhook");
            Ok(Json(ApiResponse::success(outcome.into())))
        }
        Err(ReconstructError::Incomplete {
            run_id,
            spans_emitted,
            errors,
        }) => {
            span.record("outcome", "incomplete");
            for error in errors.iter() {
                tracing::warn!(run.id = run_id, "{}", error);
            }
            tracing::warn!(
                run.id = run_id,
                spans_emitted,
                failed_nodes = errors.len(),
                "workflow run trace is incomplete"
            );
            Ok(Json(ApiResponse::success(WebhookResult::Incomplete {
                run_id,
                spans_emitted,
                errors: errors.iter().map(ToString::to_string).collect(),
            })))
        }
        Err(err) => {
            span.record("outcome", "rejected");
            Err(reconstruct_failure(err))
        }
    }
}

fn outcome_name(outcome: &TraceOutcome) -> &'static str {
    match outcome {
        TraceOutcome::Skipped { .. } => "skipped",
        TraceOutcome::Traced { .. } => "traced",
    }
}

fn reconstruct_failure(err: ReconstructError) -> ApiError {
    let run_id = err.run_id();
    let message = err.to_string();

    match err.kind() {
        ErrorKind::Upstream => {
            tracing::error!(run.id = ?run_id, error = %message, "failed to fetch workflow jobs");
            ApiError::BadGateway { message, run_id }
        }
        _ => {
            tracing::warn!(run.id = ?run_id, error = %message, "rejected workflow run webhook");
            ApiError::Unprocessable { message, run_id }
        }
    }
}

/// GET /api/v1/properties/:name
pub async fn get_properties(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Json<ApiResponse<HashMap<String, String>>> {
    Json(ApiResponse::success(state.cache.get_props(&name)))
}

/// PUT /api/v1/properties/:name
pub async fn put_properties(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(props): Json<HashMap<String, String>>,
) -> Json<ApiResponse<CacheEntry>> {
    let entry = CacheEntry::fresh(props);
    state.cache.insert(name.clone(), entry.clone());
    tracing::debug!(entry = %name, "cache entry stored");
    Json(ApiResponse::success(entry))
}

/// POST /api/v1/properties/refresh
pub async fn refresh_properties(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<RefreshSummary>> {
    let report = state.cache.refresh_force(&CancellationToken::new()).await;
    report.log_summary();
    Json(ApiResponse::success(RefreshSummary::from(&report)))
}
