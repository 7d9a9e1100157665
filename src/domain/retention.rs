//! Retention cleanup: the pass run on each end-of-day event.
//!
//! Purges candles older than the configured retention for their interval.
//! Progress is checkpointed after every series so a pass interrupted by a
//! crash or shutdown resumes with the same cutoffs and skips what it already
//! purged.

use crate::domain::cleanup::{CleanupSummary, EodEvent};
use crate::domain::error::MigratorError;
use crate::domain::settings::RetentionPolicy;
use crate::domain::snapshot::SnapshotStore;
use crate::ports::candle_sink::CandleSink;
use crate::ports::cleanup_task::CleanupTask;
use crate::ports::snapshot_backend::SnapshotBackend;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const CLEANUP_NAMESPACE: &str = "cleanup";
const CHECKPOINT_KEY: &str = "retention";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupCheckpoint {
    pub event_id: String,
    /// Cutoffs of the pass are computed from this instant.
    pub reference: DateTime<Utc>,
    /// Series keys (`PAIR:price:interval`) already purged.
    pub purged: BTreeSet<String>,
    pub rows_purged: u64,
    pub completed: bool,
}

pub struct RetentionCleanup {
    sink: Arc<dyn CandleSink>,
    policy: RetentionPolicy,
    checkpoints: SnapshotStore<CleanupCheckpoint>,
}

impl RetentionCleanup {
    pub fn new(sink: Arc<dyn CandleSink>, snapshots: Arc<dyn SnapshotBackend>, policy: RetentionPolicy) -> Self {
        Self {
            sink,
            policy,
            checkpoints: SnapshotStore::new(snapshots, CLEANUP_NAMESPACE),
        }
    }

    pub async fn checkpoint(&self) -> Result<Option<CleanupCheckpoint>, MigratorError> {
        self.checkpoints.try_get(CHECKPOINT_KEY).await
    }
}

#[async_trait]
impl CleanupTask for RetentionCleanup {
    async fn run(&self, event: &EodEvent, cancel: &CancellationToken) -> Result<CleanupSummary, MigratorError> {
        let (mut checkpoint, resumed_from) = match self.checkpoint().await? {
            Some(cp) if !cp.completed => {
                info!(event = %event.id, interrupted = %cp.event_id, "resuming interrupted cleanup pass");
                let from = cp.event_id.clone();
                (cp, Some(from))
            }
            _ => {
                let fresh = CleanupCheckpoint {
                    event_id: event.id.clone(),
                    reference: event.started_at,
                    purged: BTreeSet::new(),
                    rows_purged: 0,
                    completed: false,
                };
                self.checkpoints.save(CHECKPOINT_KEY, &fresh).await?;
                (fresh, None)
            }
        };

        let mut summary = CleanupSummary {
            event_id: event.id.clone(),
            resumed_from,
            ..Default::default()
        };

        for series in self.sink.list_series().await? {
            if cancel.is_cancelled() {
                info!(event = %event.id, purged = summary.series_purged, "cleanup pass cancelled");
                summary.cancelled = true;
                return Ok(summary);
            }
            let key = series.to_string();
            if checkpoint.purged.contains(&key) {
                summary.series_skipped += 1;
                continue;
            }
            let Some(cutoff) = self.policy.cutoff(series.interval, checkpoint.reference) else {
                continue;
            };

            let rows = self.sink.purge_before(&series, cutoff).await?;
            debug!(series = %series, cutoff = %cutoff, rows, "series purged");
            checkpoint.purged.insert(key);
            checkpoint.rows_purged += rows;
            self.checkpoints.save(CHECKPOINT_KEY, &checkpoint).await?;
            summary.series_purged += 1;
            summary.rows_purged += rows;
        }

        checkpoint.completed = true;
        self.checkpoints.save(CHECKPOINT_KEY, &checkpoint).await?;
        Ok(summary)
    }
}
