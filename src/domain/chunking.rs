//! Chunked retrieval protocol shared by every history provider.
//!
//! A provider only has to know how to read one bounded page of a series
//! strictly after a timestamp ([`PageSource`]). [`drive_chunks`] turns that
//! into the full streaming contract: cancellation between pages, bounded
//! retry of transient failures, validation of ordering and range, and strict
//! hand-off to the [`ChunkHandler`] before the next page is read.

use crate::domain::asset_pair::AssetPair;
use crate::domain::candle::{Candle, PriceType, SeriesKey, TimeInterval};
use crate::domain::error::MigratorError;
use crate::ports::history_provider::ChunkHandler;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Where a retrieval starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowerBound {
    /// From the first candle the source holds.
    Earliest,
    /// Candles at or after the timestamp.
    Inclusive(DateTime<Utc>),
    /// Candles strictly after the timestamp. Used to resume behind the last
    /// candle already ingested.
    Exclusive(DateTime<Utc>),
}

impl LowerBound {
    pub fn admits(&self, ts: DateTime<Utc>) -> bool {
        match self {
            LowerBound::Earliest => true,
            LowerBound::Inclusive(bound) => ts >= *bound,
            LowerBound::Exclusive(bound) => ts > *bound,
        }
    }
}

/// Everything a provider needs to stream one series.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRequest {
    pub asset_pair: AssetPair,
    pub price_type: PriceType,
    pub interval: TimeInterval,
    pub lower: LowerBound,
    /// Exclusive upper bound.
    pub end: DateTime<Utc>,
}

impl HistoryRequest {
    pub fn series(&self) -> SeriesKey {
        SeriesKey::new(self.asset_pair.id(), self.price_type, self.interval)
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.lower.admits(ts) && ts < self.end
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkStats {
    pub chunks: usize,
    pub candles: u64,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub cancelled: bool,
}

/// Bounded retry with capped exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails permanently, or the attempt budget is
    /// spent. Returns `Ok(None)` if `cancel` fires while backing off.
    ///
    /// Exhausting the budget on a transient error yields `SourceUnavailable`;
    /// permanent errors are returned unchanged on first occurrence.
    pub async fn run<T, F, Fut>(
        &self,
        source: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<Option<T>, MigratorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MigratorError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(Some(value)),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) if attempt >= max_attempts => {
                    return Err(MigratorError::SourceUnavailable {
                        provider: source.to_string(),
                        attempts: attempt,
                        reason: err.to_string(),
                    });
                }
                Err(err) => {
                    let delay = self.backoff_for(attempt);
                    warn!(
                        provider = source,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient source error, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

/// One page read from a source, plus the cursor to resume the next read.
#[derive(Debug)]
pub struct Page<C> {
    pub candles: Vec<Candle>,
    pub cursor: C,
}

/// Page-level access to one historical archive.
///
/// `Cursor` lets a source carry a read position between pages (a file offset,
/// for example). Sources that can seek by timestamp use `()`.
#[async_trait]
pub trait PageSource: Send + Sync {
    type Cursor: Clone + Default + Send + Sync;

    fn source_name(&self) -> &'static str;

    /// Read at most `limit` candles of the request's series that satisfy
    /// `after` and lie before `request.end`, in ascending timestamp order.
    async fn fetch_page(
        &self,
        request: &HistoryRequest,
        after: LowerBound,
        cursor: Self::Cursor,
        limit: usize,
    ) -> Result<Page<Self::Cursor>, MigratorError>;
}

pub async fn drive_chunks<S: PageSource>(
    source: &S,
    request: &HistoryRequest,
    chunk_size: usize,
    retry: &RetryPolicy,
    on_chunk: &mut dyn ChunkHandler,
    cancel: &CancellationToken,
) -> Result<ChunkStats, MigratorError> {
    let series = request.series();
    let limit = chunk_size.max(1);
    let mut stats = ChunkStats::default();
    let mut after = request.lower;
    let mut cursor = S::Cursor::default();

    loop {
        if cancel.is_cancelled() {
            info!(series = %series, chunks = stats.chunks, "retrieval cancelled");
            stats.cancelled = true;
            return Ok(stats);
        }

        let cursor_ref = &cursor;
        let fetched = retry
            .run(source.source_name(), cancel, move || {
                source.fetch_page(request, after, cursor_ref.clone(), limit)
            })
            .await?;
        let Some(page) = fetched else {
            info!(series = %series, chunks = stats.chunks, "retrieval cancelled during backoff");
            stats.cancelled = true;
            return Ok(stats);
        };

        validate_page(&series, request, stats.last_timestamp, &page.candles, limit)?;
        let Some(last) = page.candles.last().map(|c| c.timestamp) else {
            break;
        };
        let delivered = page.candles.len();

        on_chunk.on_chunk(&page.candles).await?;

        stats.chunks += 1;
        stats.candles += delivered as u64;
        stats.last_timestamp = Some(last);
        after = LowerBound::Exclusive(last);
        cursor = page.cursor;
        debug!(
            series = %series,
            chunk = stats.chunks,
            candles = delivered,
            last = %last,
            "chunk delivered"
        );

        if delivered < limit {
            break;
        }
    }

    Ok(stats)
}

fn validate_page(
    series: &SeriesKey,
    request: &HistoryRequest,
    previous: Option<DateTime<Utc>>,
    candles: &[Candle],
    limit: usize,
) -> Result<(), MigratorError> {
    if candles.len() > limit {
        return Err(MigratorError::SourceData {
            series: series.to_string(),
            reason: format!("page of {} candles exceeds chunk size {limit}", candles.len()),
        });
    }
    let mut prev = previous;
    for candle in candles {
        let ts = candle.timestamp;
        if !request.contains(ts) {
            return Err(MigratorError::SourceData {
                series: series.to_string(),
                reason: format!("candle at {ts} is outside the requested range"),
            });
        }
        if let Some(p) = prev
            && ts <= p
        {
            let reason = if ts == p {
                format!("duplicate candle timestamp {ts}")
            } else {
                format!("candle at {ts} is out of order (previous {p})")
            };
            return Err(MigratorError::SourceData {
                series: series.to_string(),
                reason,
            });
        }
        prev = Some(ts);
    }
    Ok(())
}
