//! Historical data source port.

use crate::domain::asset_pair::AssetPair;
use crate::domain::candle::{Candle, PriceType, TimeInterval};
use crate::domain::chunking::{ChunkStats, HistoryRequest};
use crate::domain::error::MigratorError;
use crate::domain::registry::ProviderType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Receives chunks from a provider, one at a time, in timestamp order.
///
/// The provider awaits `on_chunk` before fetching the next page, so a slow
/// handler throttles the source. Returning an error stops the stream and the
/// error is propagated out of [`HistoryProvider::get_history_by_chunks`].
#[async_trait]
pub trait ChunkHandler: Send {
    async fn on_chunk(&mut self, chunk: &[Candle]) -> Result<(), MigratorError>;
}

/// A stateless fetcher over one kind of historical archive.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Earliest timestamp the source holds for the series, or `None` when the
    /// series is empty.
    async fn get_start_date(
        &self,
        asset_pair: &AssetPair,
        price_type: PriceType,
        interval: TimeInterval,
    ) -> Result<Option<DateTime<Utc>>, MigratorError>;

    /// Stream every candle admitted by `request` to `on_chunk` in bounded
    /// chunks.
    ///
    /// Cancellation is observed between chunks and ends the stream with
    /// `Ok(stats)` where `stats.cancelled` is set. Transient source failures
    /// are retried; once retries are exhausted the call fails with
    /// `SourceUnavailable` and chunks already delivered stand.
    async fn get_history_by_chunks(
        &self,
        request: &HistoryRequest,
        on_chunk: &mut dyn ChunkHandler,
        cancel: &CancellationToken,
    ) -> Result<ChunkStats, MigratorError>;
}
