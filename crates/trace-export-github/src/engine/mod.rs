//! Retroactive trace reconstruction
//!
//! Turns a completed `workflow_run` webhook and its jobs listing into a
//! run -> Queued/job -> step span tree, using only recorded timestamps.
//! Reconstruction is sequential: emission order carries the parent links.

mod jobs;

use serde::Serialize;
use std::sync::Arc;
use trace_export_span::{HistoricalSpan, SpanEmitter};

use crate::client::{FetchError, JobsFetcher};
use crate::contracts::{attributes, RunAction, WorkflowRun, WorkflowRunPayload};
use crate::error::{ReconstructError, Result, TraceErrors};

/// Name of the span measuring time before the first job was picked up
pub const QUEUED_SPAN_NAME: &str = "Queued";

/// Successful result of a reconstruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TraceOutcome {
    /// The action carries no completed timing data; nothing was emitted
    Skipped { run_id: i64, action: String },
    /// The full tree was emitted
    Traced { run_id: i64, spans_emitted: usize },
}

/// Reconstructs workflow run traces
pub struct Reconstructor {
    emitter: Arc<dyn SpanEmitter>,
    fetcher: Arc<dyn JobsFetcher>,
}

impl Reconstructor {
    /// Create a reconstructor with its span sink and jobs source
    pub fn new(emitter: Arc<dyn SpanEmitter>, fetcher: Arc<dyn JobsFetcher>) -> Self {
        Self { emitter, fetcher }
    }

    /// Handle one webhook delivery.
    ///
    /// Validation failures of individual jobs or steps do not stop the
    /// reconstruction; they come back together as
    /// `ReconstructError::Incomplete` after every valid node was emitted.
    pub async fn reconstruct(&self, payload: &WorkflowRunPayload) -> Result<TraceOutcome> {
        if payload.action.is_empty() {
            return Err(ReconstructError::MissingAction);
        }
        let run = payload
            .workflow_run
            .as_ref()
            .ok_or(ReconstructError::MissingRun)?;
        if run.id == 0 {
            return Err(ReconstructError::MissingRunId);
        }

        match RunAction::parse(&payload.action) {
            RunAction::Requested | RunAction::InProgress => {
                tracing::debug!(
                    run.id = run.id,
                    run.status = %payload.action,
                    "skipping workflow run"
                );
                Ok(TraceOutcome::Skipped {
                    run_id: run.id,
                    action: payload.action.clone(),
                })
            }
            RunAction::Completed => self.trace_completed(run).await,
            RunAction::Unknown => Err(ReconstructError::UnknownAction {
                run_id: run.id,
                action: payload.action.clone(),
            }),
        }
    }

    async fn trace_completed(&self, run: &WorkflowRun) -> Result<TraceOutcome> {
        let run_id = run.id;

        let start = run.run_started_at.ok_or(ReconstructError::TimestampMissing {
            run_id,
            field: "run_started_at",
        })?;
        // the completed action's updated_at is when the run finished
        let end = run.updated_at.ok_or(ReconstructError::TimestampMissing {
            run_id,
            field: "updated_at",
        })?;
        if end < start {
            return Err(ReconstructError::EndBeforeStart { run_id });
        }

        tracing::debug!(run.id = run_id, run.status = "completed", "handling workflow run");

        let root = self.emitter.emit(
            HistoricalSpan::new(run.span_name(), start, end)
                .with_attribute(attributes::WORKFLOW_RUN_ID, run_id),
            None,
        );
        let mut spans_emitted = 1;

        let jobs_url = run
            .jobs_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or(ReconstructError::MissingJobsUrl { run_id })?;

        let jobs = self
            .fetcher
            .fetch_jobs(jobs_url)
            .await
            .map_err(|source| match source {
                FetchError::Decode(_) => ReconstructError::JobsDecode { run_id, source },
                _ => ReconstructError::JobsFetch { run_id, source },
            })?;

        let first_job = match jobs.jobs.first() {
            Some(job) if jobs.total_count >= 1 => job,
            _ => return Err(ReconstructError::NoJobs { run_id }),
        };
        let first_start = first_job
            .started_at
            .ok_or(ReconstructError::FirstJobTimestampMissing { run_id })?;

        // re-runs can report a first job that started before run_started_at
        let queued_end = first_start.max(start);
        self.emitter
            .emit(HistoricalSpan::new(QUEUED_SPAN_NAME, start, queued_end), Some(&root));
        spans_emitted += 1;

        let mut errors = TraceErrors::default();
        for job in &jobs.jobs {
            spans_emitted += jobs::trace_job(self.emitter.as_ref(), &root, job, &mut errors);
        }

        if errors.is_empty() {
            tracing::debug!(run.id = run_id, spans_emitted, "workflow run traced");
            Ok(TraceOutcome::Traced {
                run_id,
                spans_emitted,
            })
        } else {
            Err(ReconstructError::Incomplete {
                run_id,
                spans_emitted,
                errors,
            })
        }
    }
}
