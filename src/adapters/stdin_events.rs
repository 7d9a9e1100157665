//! Newline-delimited JSON transport for end-of-day events.
//!
//! Each line is one [`EodEvent`], e.g. `{"id":"eod-2024-03-01"}`. Every event
//! is handed to the coordinator on its own task, so an event that arrives
//! while a pass is running reaches the coordinator's gate immediately.

use crate::domain::cleanup::{CleanupCoordinator, CleanupOutcome, EodEvent};
use crate::domain::error::MigratorError;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenSummary {
    pub received: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub malformed: usize,
}

impl ListenSummary {
    fn record(&mut self, outcome: &CleanupOutcome) {
        match outcome {
            CleanupOutcome::Completed(_) => self.completed += 1,
            CleanupOutcome::Skipped => self.skipped += 1,
            CleanupOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Consume events until EOF or cancellation, then wait for passes still in
/// flight. Lines that are not valid UTF-8 or not an event are counted as
/// malformed and skipped. A failed pass is counted, never fatal; a read error
/// ends the stream and is returned once in-flight passes have finished.
pub async fn listen<R>(
    mut reader: R,
    coordinator: Arc<CleanupCoordinator>,
    cancel: CancellationToken,
) -> Result<ListenSummary, MigratorError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut tasks: JoinSet<CleanupOutcome> = JoinSet::new();
    let mut summary = ListenSummary::default();
    let mut read_error = None;

    loop {
        buf.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => {
                info!("event listener cancelled");
                break;
            }
            read = reader.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) => {
                info!("event stream closed");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "event stream read failed");
                read_error = Some(e);
                break;
            }
        }
        let Some(event) = parse_line(&buf, &mut summary) else {
            continue;
        };
        summary.received += 1;
        info!(event = %event.id, "end-of-day event received");

        let coordinator = Arc::clone(&coordinator);
        let cancel = cancel.clone();
        tasks.spawn(async move { coordinator.handle_eod(&event, &cancel).await });

        while let Some(done) = tasks.try_join_next() {
            record_join(&mut summary, done);
        }
    }

    while let Some(done) = tasks.join_next().await {
        record_join(&mut summary, done);
    }
    match read_error {
        Some(e) => Err(e.into()),
        None => Ok(summary),
    }
}

/// Blank lines yield `None` without counting.
fn parse_line(raw: &[u8], summary: &mut ListenSummary) -> Option<EodEvent> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line.trim(),
        Err(e) => {
            warn!(error = %e, "ignoring event line that is not UTF-8");
            summary.malformed += 1;
            return None;
        }
    };
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "ignoring malformed event");
            summary.malformed += 1;
            None
        }
    }
}

fn record_join(summary: &mut ListenSummary, done: Result<CleanupOutcome, tokio::task::JoinError>) {
    match done {
        Ok(outcome) => summary.record(&outcome),
        Err(e) => {
            error!(error = %e, "cleanup task aborted");
            summary.failed += 1;
        }
    }
}
