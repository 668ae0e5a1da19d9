//! Error types for trace reconstruction
//!
//! Run-level failures stop a reconstruction. Job- and step-level failures are
//! collected into `TraceErrors` while their siblings keep being traced.

use std::fmt;
use thiserror::Error;

use crate::client::FetchError;

/// Why a single job or step was left out of the trace
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeFault {
    #[error("missing id")]
    MissingId,

    #[error("missing step number")]
    MissingStepNumber,

    #[error("cannot find '{field}'")]
    TimestampMissing { field: &'static str },

    #[error("'completed_at' is earlier than 'started_at'")]
    EndBeforeStart,
}

/// A job that failed validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("workflow job 'id = {job_id}': {reason}")]
pub struct JobHandlingError {
    pub job_id: i64,
    pub reason: NodeFault,
}

/// A step that failed validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("job step 'name = {step_name}' of job 'id = {job_id}': {reason}")]
pub struct StepHandlingError {
    pub job_id: i64,
    pub step_name: String,
    pub reason: NodeFault,
}

/// One entry of a `TraceErrors` list
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error(transparent)]
    Job(#[from] JobHandlingError),

    #[error(transparent)]
    Step(#[from] StepHandlingError),
}

/// Per-node failures collected during one reconstruction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceErrors(Vec<NodeError>);

impl TraceErrors {
    pub fn push(&mut self, err: impl Into<NodeError>) {
        self.0.push(err.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeError> {
        self.0.iter()
    }

    /// Job-level failures only
    pub fn jobs(&self) -> impl Iterator<Item = &JobHandlingError> {
        self.0.iter().filter_map(|e| match e {
            NodeError::Job(j) => Some(j),
            NodeError::Step(_) => None,
        })
    }

    /// Step-level failures only
    pub fn steps(&self) -> impl Iterator<Item = &StepHandlingError> {
        self.0.iter().filter_map(|e| match e {
            NodeError::Step(s) => Some(s),
            NodeError::Job(_) => None,
        })
    }

    pub fn into_vec(self) -> Vec<NodeError> {
        self.0
    }
}

impl fmt::Display for TraceErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for TraceErrors {}

impl IntoIterator for TraceErrors {
    type Item = NodeError;
    type IntoIter = std::vec::IntoIter<NodeError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Broad class of a reconstruction error, for callers deciding how to react
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The payload is missing data the trace needs
    Validation,
    /// The event source sent an action this service does not know
    UnknownAction,
    /// The jobs endpoint failed or returned garbage
    Upstream,
    /// Some jobs or steps were skipped; the rest was traced
    Partial,
}

/// Errors returned by `Reconstructor::reconstruct`
#[derive(Error, Debug)]
pub enum ReconstructError {
    #[error("webhook payload 'action' was not found")]
    MissingAction,

    #[error("expecting a 'workflow_run' for all webhook events")]
    MissingRun,

    #[error("expecting a 'workflow_run.id' for all webhook events")]
    MissingRunId,

    #[error("workflow run 'id = {run_id}': action '{action}' is unknown; the event source sent an unexpected payload")]
    UnknownAction { run_id: i64, action: String },

    #[error("workflow run 'id = {run_id}': cannot find '{field}'")]
    TimestampMissing { run_id: i64, field: &'static str },

    #[error("workflow run 'id = {run_id}': 'updated_at' is earlier than 'run_started_at'")]
    EndBeforeStart { run_id: i64 },

    #[error("workflow run 'id = {run_id}': cannot find 'jobs_url'")]
    MissingJobsUrl { run_id: i64 },

    #[error("workflow run 'id = {run_id}': request to fetch jobs failed: {source}")]
    JobsFetch {
        run_id: i64,
        #[source]
        source: FetchError,
    },

    #[error("workflow run 'id = {run_id}': jobs response could not be decoded: {source}")]
    JobsDecode {
        run_id: i64,
        #[source]
        source: FetchError,
    },

    #[error("workflow run 'id = {run_id}': not enough jobs in workflow to trace")]
    NoJobs { run_id: i64 },

    #[error("workflow run 'id = {run_id}': first job did not have a start time")]
    FirstJobTimestampMissing { run_id: i64 },

    #[error("workflow run 'id = {run_id}': trace is incomplete ({spans_emitted} spans emitted): {errors}")]
    Incomplete {
        run_id: i64,
        spans_emitted: usize,
        errors: TraceErrors,
    },
}

impl ReconstructError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconstructError::UnknownAction { .. } => ErrorKind::UnknownAction,
            ReconstructError::JobsFetch { .. } | ReconstructError::JobsDecode { .. } => {
                ErrorKind::Upstream
            }
            ReconstructError::Incomplete { .. } => ErrorKind::Partial,
            _ => ErrorKind::Validation,
        }
    }

    /// Run id the error is about, when the payload carried one
    pub fn run_id(&self) -> Option<i64> {
        match self {
            ReconstructError::MissingAction
            | ReconstructError::MissingRun
            | ReconstructError::MissingRunId => None,
            ReconstructError::UnknownAction { run_id, .. }
            | ReconstructError::TimestampMissing { run_id, .. }
            | ReconstructError::EndBeforeStart { run_id }
            | ReconstructError::MissingJobsUrl { run_id }
            | ReconstructError::JobsFetch { run_id, .. }
            | ReconstructError::JobsDecode { run_id, .. }
            | ReconstructError::NoJobs { run_id }
            | ReconstructError::FirstJobTimestampMissing { run_id }
            | ReconstructError::Incomplete { run_id, .. } => Some(*run_id),
        }
    }

    /// Node failures of an incomplete trace
    pub fn node_errors(&self) -> Option<&TraceErrors> {
        match self {
            ReconstructError::Incomplete { errors, .. } => Some(errors),
            _ => None,
        }
    }
}

/// Result type alias for reconstruction
pub type Result<T> = std::result::Result<T, ReconstructError>;
