//! Offline replay of a stored webhook delivery
//!
//! Runs the reconstructor against a saved payload (and optionally a saved
//! jobs response) with a recording emitter, so the resulting tree can be
//! inspected without a collector.

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use trace_export_github::{
    FetchError, ReconstructError, Reconstructor, StaticJobsFetcher, TraceOutcome,
    WorkflowRunPayload,
};
use trace_export_span::{RecordingEmitter, SpanTree};

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid webhook payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Invalid jobs response: {0}")]
    Jobs(#[from] FetchError),
}

/// Result of one replay
#[derive(Debug)]
pub struct Replay {
    pub result: Result<TraceOutcome, ReconstructError>,
    pub trees: Vec<SpanTree>,
}

impl Replay {
    /// Number of spans the reconstruction emitted
    pub fn spans_emitted(&self) -> usize {
        self.trees.iter().map(SpanTree::len).sum()
    }

    /// Span trees as indented text
    pub fn render(&self) -> String {
        self.trees.iter().map(SpanTree::render).collect()
    }
}

/// Replay a payload given as JSON text
pub async fn replay(payload_json: &str, jobs_json: Option<&str>) -> Result<Replay, ReplayError> {
    let payload: WorkflowRunPayload = serde_json::from_str(payload_json)?;
    let fetcher = match jobs_json {
        Some(json) => StaticJobsFetcher::from_json(json)?,
        None => StaticJobsFetcher::default(),
    };

    let emitter = Arc::new(RecordingEmitter::new());
    let reconstructor = Reconstructor::new(emitter.clone(), Arc::new(fetcher));
    let result = reconstructor.reconstruct(&payload).await;

    Ok(Replay {
        result,
        trees: emitter.trees(),
    })
}

/// Replay a payload stored on disk
pub async fn replay_files(payload: &Path, jobs: Option<&Path>) -> Result<Replay, ReplayError> {
    let payload_json = read(payload)?;
    let jobs_json = jobs.map(read).transpose()?;
    replay(&payload_json, jobs_json.as_deref()).await
}

fn read(path: &Path) -> Result<String, ReplayError> {
    std::fs::read_to_string(path).map_err(|source| ReplayError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replay_without_jobs_keeps_root() {
        let payload = r#"{
            "action": "completed",
            "workflow_run": {
                "id": 5,
                "name": "Nightly",
                "jobs_url": "https://api.github.com/repos/o/r/actions/runs/5/jobs",
                "run_started_at": "2024-10-01T00:00:00Z",
                "updated_at": "2024-10-01T00:10:00Z"
            }
        }"#;

        let replay = replay(payload, None).await.unwrap();

        assert!(matches!(
            replay.result,
            Err(ReconstructError::NoJobs { run_id: 5 })
        ));
        assert_eq!(replay.spans_emitted(), 1);
        assert!(replay.render().contains("Nightly"));
    }

    #[tokio::test]
    async fn test_replay_rejects_invalid_payload() {
        let err = replay("[]", None).await.unwrap_err();
        assert!(matches!(err, ReplayError::Payload(_)));
    }
}
