//! GitHub Actions workflow run tracing
//!
//! Reconstructs historical traces of completed workflow runs: the run, the
//! time it spent queued, each job and each step, all timed by the
//! timestamps GitHub recorded.
//!
//! # Design Principles
//! - Historical: spans never use the wall clock
//! - Partial over nothing: a bad job or step is skipped, its siblings traced
//! - Injected collaborators: span emission and jobs fetching are seams

pub mod client;
pub mod contracts;
pub mod engine;
pub mod error;

pub use client::{FetchError, GithubJobsClient, JobsFetcher, StaticJobsFetcher};
pub use contracts::*;
pub use engine::{Reconstructor, TraceOutcome, QUEUED_SPAN_NAME};
pub use error::{
    ErrorKind, JobHandlingError, NodeError, NodeFault, ReconstructError, StepHandlingError,
    TraceErrors,
};
