//! End-of-day cleanup coordination.
//!
//! [`CleanupCoordinator`] gates cleanup passes so at most one runs at a time.
//! Events that arrive while a pass is running are skipped, not queued; an
//! event that arrives after the pass finished starts a new one.

use crate::domain::error::MigratorError;
use crate::ports::cleanup_task::CleanupTask;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Inbound signal that an end-of-day process has started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EodEvent {
    pub id: String,
    #[serde(default = "Utc::now")]
    pub started_at: DateTime<Utc>,
}

impl EodEvent {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CleanupSummary {
    pub event_id: String,
    /// Event id of the interrupted pass this one picked up, if any.
    pub resumed_from: Option<String>,
    pub series_purged: usize,
    /// Series already handled by the interrupted pass.
    pub series_skipped: usize,
    pub rows_purged: u64,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CleanupOutcome {
    Completed(CleanupSummary),
    /// Another pass was already running.
    Skipped,
    Failed(MigratorError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Running,
}

pub struct CleanupCoordinator {
    task: Arc<dyn CleanupTask>,
    running: AtomicBool,
    passes: AtomicU64,
}

/// Returns the coordinator to `Idle` when dropped, including when the
/// handling future is dropped mid-pass.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl CleanupCoordinator {
    pub fn new(task: Arc<dyn CleanupTask>) -> Self {
        Self {
            task,
            running: AtomicBool::new(false),
            passes: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> CoordinatorState {
        if self.running.load(Ordering::Acquire) {
            CoordinatorState::Running
        } else {
            CoordinatorState::Idle
        }
    }

    /// Number of passes started since construction.
    pub fn passes_started(&self) -> u64 {
        self.passes.load(Ordering::Acquire)
    }

    pub async fn handle_eod(&self, event: &EodEvent, cancel: &CancellationToken) -> CleanupOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!(event = %event.id, "cleanup skipped, pass already in progress");
            return CleanupOutcome::Skipped;
        }
        let _guard = RunningGuard(&self.running);
        let pass = self.passes.fetch_add(1, Ordering::AcqRel) + 1;
        info!(event = %event.id, pass, "cleanup pass started");

        match self.task.run(event, cancel).await {
            Ok(summary) => {
                info!(
                    event = %event.id,
                    pass,
                    series = summary.series_purged,
                    rows = summary.rows_purged,
                    cancelled = summary.cancelled,
                    "cleanup pass finished"
                );
                CleanupOutcome::Completed(summary)
            }
            Err(err) => {
                error!(event = %event.id, pass, error = %err, "cleanup pass failed");
                let err = match err {
                    MigratorError::CleanupFailed { .. } => err,
                    other => MigratorError::CleanupFailed {
                        reason: other.to_string(),
                    },
                };
                CleanupOutcome::Failed(err)
            }
        }
    }
}
