//! Background refresh schedule
//!
//! ```text
//! Idle -> Refreshing -> Sleeping -> Refreshing -> ... -> Stopped
//! ```
//!
//! Cancellation is observed between batches only. A batch that has started
//! runs to completion, bounded by the per-entry refresh timeout.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::field::Empty;
use tracing::Instrument;

use crate::cache::PropertyCache;

/// Lifecycle state of a refresh schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Refreshing,
    Sleeping,
    Stopped,
}

/// Handle to a running refresh schedule
#[derive(Debug)]
pub struct RefreshSchedule {
    state: watch::Receiver<SchedulerState>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RefreshSchedule {
    /// Current state
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Receiver for state changes
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.clone()
    }

    /// Ask the schedule to stop after the current batch
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the background task to finish
    pub async fn join(self) -> Result<(), JoinError> {
        self.handle.await
    }

    /// Cancel and wait for the background task to finish
    pub async fn stop(self) -> Result<(), JoinError> {
        self.cancel();
        self.join().await
    }
}

impl PropertyCache {
    /// Start refreshing expired entries every `interval` until `cancel` fires.
    ///
    /// Each batch is summarised in the logs. When a batch takes longer than
    /// `interval`, the next one starts immediately.
    pub fn schedule_refresh(
        self: &Arc<Self>,
        cancel: CancellationToken,
        interval: Duration,
    ) -> RefreshSchedule {
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);
        let cache = Arc::clone(self);
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            cache.run_schedule(token, interval, state_tx).await;
        });

        RefreshSchedule {
            state: state_rx,
            cancel,
            handle,
        }
    }

    async fn run_schedule(
        &self,
        cancel: CancellationToken,
        interval: Duration,
        state: watch::Sender<SchedulerState>,
    ) {
        tracing::info!(interval_ms = interval.as_millis() as u64, "cache refresh schedule started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            state.send_replace(SchedulerState::Refreshing);
            let started = Instant::now();

            let span = tracing::info_span!(
                "cache.scheduled_refresh",
                refresh.schedule.interval.ms = interval.as_millis() as u64,
                refresh.total.succeeded = Empty,
                refresh.total.failed = Empty,
                refresh.total.skipped = Empty
            );

            // batches are not interrupted by the schedule's own cancellation
            let batch = CancellationToken::new();
            let report = self
                .refresh_expired_at(&batch, Utc::now())
                .instrument(span.clone())
                .await;
            report.record_on(&span);
            span.in_scope(|| report.log_summary());

            let elapsed = started.elapsed();
            tracing::debug!(
                elapsed_ms = elapsed.as_millis() as u64,
                "scheduled cache refresh finished"
            );

            state.send_replace(SchedulerState::Sleeping);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval.saturating_sub(elapsed)) => {}
            }
        }

        state.send_replace(SchedulerState::Stopped);
        tracing::info!("cache refresh schedule stopped");
    }
}
