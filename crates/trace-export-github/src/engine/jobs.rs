//! Job and step span emission
//!
//! Each node is validated on its own; a failure is recorded and the next
//! sibling is traced regardless.

use chrono::{DateTime, Utc};
use trace_export_span::{HistoricalSpan, SpanContext, SpanEmitter};

use crate::contracts::{attributes, JobStep, WorkflowJob};
use crate::error::{JobHandlingError, NodeFault, StepHandlingError, TraceErrors};

/// Validate a recorded `started_at..completed_at` interval.
pub(crate) fn interval(
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), NodeFault> {
    let start = started_at.ok_or(NodeFault::TimestampMissing { field: "started_at" })?;
    let end = completed_at.ok_or(NodeFault::TimestampMissing {
        field: "completed_at",
    })?;
    if end < start {
        return Err(NodeFault::EndBeforeStart);
    }
    Ok((start, end))
}

/// Emit a job span and its step spans under `root`.
///
/// Returns the number of spans emitted.
pub(crate) fn trace_job(
    emitter: &dyn SpanEmitter,
    root: &SpanContext,
    job: &WorkflowJob,
    errors: &mut TraceErrors,
) -> usize {
    if job.id == 0 {
        errors.push(JobHandlingError {
            job_id: job.id,
            reason: NodeFault::MissingId,
        });
        return 0;
    }

    let (start, end) = match interval(job.started_at, job.completed_at) {
        Ok(bounds) => bounds,
        Err(reason) => {
            errors.push(JobHandlingError {
                job_id: job.id,
                reason,
            });
            return 0;
        }
    };

    let span = HistoricalSpan::new(job.span_name(), start, end)
        .with_attribute(attributes::WORKFLOW_JOB_ID, job.id);
    let job_ctx = emitter.emit(span, Some(root));

    let mut emitted = 1;
    for step in &job.steps {
        match trace_step(emitter, &job_ctx, step) {
            Ok(()) => emitted += 1,
            Err(reason) => errors.push(StepHandlingError {
                job_id: job.id,
                step_name: step.span_name().to_string(),
                reason,
            }),
        }
    }
    emitted
}

fn trace_step(emitter: &dyn SpanEmitter, job: &SpanContext, step: &JobStep) -> Result<(), NodeFault> {
    if step.number == 0 {
        return Err(NodeFault::MissingStepNumber);
    }
    let (start, end) = interval(step.started_at, step.completed_at)?;

    let name = step.span_name();
    let span = HistoricalSpan::new(name, start, end)
        .with_attribute(attributes::STEP_NAME, name)
        .with_attribute(attributes::STEP_NUMBER, step.number);
    emitter.emit(span, Some(job));
    Ok(())
}
