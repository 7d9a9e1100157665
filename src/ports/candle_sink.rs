//! Candle store port: where migrated candles land.

use crate::domain::candle::{Candle, SeriesKey};
use crate::domain::error::MigratorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait CandleSink: Send + Sync {
    /// Persist an ordered batch for one series. Re-ingesting a candle with an
    /// existing timestamp replaces it. Returns the number of rows written.
    async fn ingest(&self, series: &SeriesKey, candles: &[Candle]) -> Result<u64, MigratorError>;

    async fn last_ingested(&self, series: &SeriesKey)
    -> Result<Option<DateTime<Utc>>, MigratorError>;

    async fn list_series(&self) -> Result<Vec<SeriesKey>, MigratorError>;

    /// Delete candles strictly older than `cutoff`. Returns rows removed.
    async fn purge_before(
        &self,
        series: &SeriesKey,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, MigratorError>;
}
