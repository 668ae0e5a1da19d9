//! Workflow run webhook and jobs API contracts
//!
//! Mirrors the subset of GitHub's `workflow_run` webhook and
//! `GET /repos/{owner}/{repo}/actions/runs/{run_id}/jobs` response that the
//! reconstructor reads. Every field defaults when absent so that missing
//! data surfaces as a validation error rather than a decode failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Span name used when a run, job or step has no name.
pub const UNKNOWN_NAME: &str = "UNKNOWN";

/// Span attribute keys
pub mod attributes {
    pub const WORKFLOW_RUN_ID: &str = "workflow_run.id";
    pub const WORKFLOW_JOB_ID: &str = "workflow_job.id";
    pub const STEP_NAME: &str = "step.name";
    pub const STEP_NUMBER: &str = "step.number";
}

/// A `workflow_run` webhook delivery
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRunPayload {
    /// Webhook action (`requested`, `in_progress`, `completed`)
    #[serde(default)]
    pub action: String,

    /// The run the action applies to
    #[serde(default)]
    pub workflow_run: Option<WorkflowRun>,
}

impl WorkflowRunPayload {
    pub fn new(action: impl Into<String>, run: WorkflowRun) -> Self {
        Self {
            action: action.into(),
            workflow_run: Some(run),
        }
    }
}

/// Dispatch target for a webhook action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAction {
    Requested,
    InProgress,
    Completed,
    Unknown,
}

impl RunAction {
    pub fn parse(action: &str) -> Self {
        match action {
            "requested" => RunAction::Requested,
            "in_progress" => RunAction::InProgress,
            "completed" => RunAction::Completed,
            _ => RunAction::Unknown,
        }
    }
}

/// One execution of a workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    #[serde(default)]
    pub id: i64,

    #[serde(default)]
    pub name: Option<String>,

    /// URL listing the run's jobs
    #[serde(default)]
    pub jobs_url: Option<String>,

    #[serde(default)]
    pub run_started_at: Option<DateTime<Utc>>,

    /// Completion time, when the action is `completed`
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    /// Name to use for the run's root span
    pub fn span_name(&self) -> &str {
        non_empty_or_unknown(self.name.as_deref())
    }
}

/// Jobs API response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Jobs {
    #[serde(default)]
    pub total_count: i64,

    #[serde(default)]
    pub jobs: Vec<WorkflowJob>,
}

/// One job of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowJob {
    #[serde(default)]
    pub id: i64,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Steps in the order GitHub reported them
    #[serde(default)]
    pub steps: Vec<JobStep>,
}

impl WorkflowJob {
    pub fn span_name(&self) -> &str {
        non_empty_or_unknown(self.name.as_deref())
    }
}

/// One step of a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStep {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub number: i64,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobStep {
    pub fn span_name(&self) -> &str {
        non_empty_or_unknown(self.name.as_deref())
    }
}

fn non_empty_or_unknown(name: Option<&str>) -> &str {
    match name {
        Some(n) if !n.is_empty() => n,
        _ => UNKNOWN_NAME,
    }
}
