//! CSV file archive: one file per series.
//!
//! Files are named `PAIR_pricetype_interval.csv` with the header
//! `timestamp,open,high,low,close,volume,opposite_volume,last_trade_price`
//! and RFC 3339 timestamps in ascending order. Pages are read by seeking to
//! the position where the previous page stopped, so only one page is held in
//! memory at a time.

use crate::domain::asset_pair::AssetPair;
use crate::domain::candle::{Candle, PriceType, SeriesKey, TimeInterval};
use crate::domain::chunking::{
    ChunkStats, HistoryRequest, LowerBound, Page, PageSource, RetryPolicy, drive_chunks,
};
use crate::domain::error::MigratorError;
use crate::domain::registry::ProviderType;
use crate::domain::settings::MigrationSettings;
use crate::ports::config_port::ConfigPort;
use crate::ports::history_provider::{ChunkHandler, HistoryProvider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// On-disk row layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvCandle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub opposite_volume: f64,
    pub last_trade_price: f64,
}

impl From<CsvCandle> for Candle {
    fn from(row: CsvCandle) -> Self {
        Candle {
            timestamp: row.timestamp,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            trading_volume: row.volume,
            opposite_volume: row.opposite_volume,
            last_trade_price: row.last_trade_price,
        }
    }
}

impl From<&Candle> for CsvCandle {
    fn from(c: &Candle) -> Self {
        CsvCandle {
            timestamp: c.timestamp,
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.trading_volume,
            opposite_volume: c.opposite_volume,
            last_trade_price: c.last_trade_price,
        }
    }
}

pub struct CsvHistoryProvider {
    base_path: PathBuf,
    chunk_size: usize,
    retry: RetryPolicy,
}

impl CsvHistoryProvider {
    pub fn new(base_path: PathBuf, settings: &MigrationSettings) -> Self {
        Self {
            base_path,
            chunk_size: settings.chunk_size,
            retry: settings.retry.clone(),
        }
    }

    pub fn from_config(config: &dyn ConfigPort, settings: &MigrationSettings) -> Result<Self, MigratorError> {
        let path = config
            .get_string("csv", "path")
            .ok_or_else(|| MigratorError::ConfigMissing {
                section: "csv".into(),
                key: "path".into(),
            })?;
        Ok(Self::new(PathBuf::from(path), settings))
    }

    pub fn csv_path(&self, series: &SeriesKey) -> PathBuf {
        series_path(&self.base_path, series)
    }

    /// Write a whole series file. Used to prepare archives.
    pub fn write_series(&self, series: &SeriesKey, candles: &[Candle]) -> Result<(), MigratorError> {
        std::fs::create_dir_all(&self.base_path)?;
        let mut writer = csv::Writer::from_path(self.csv_path(series)).map_err(|e| csv_error(series, e))?;
        for candle in candles {
            writer
                .serialize(CsvCandle::from(candle))
                .map_err(|e| csv_error(series, e))?;
        }
        writer.flush()?;
        Ok(())
    }
}

pub fn series_path(base: &Path, series: &SeriesKey) -> PathBuf {
    base.join(format!(
        "{}_{}_{}.csv",
        series.asset_pair, series.price_type, series.interval
    ))
}

fn csv_error(series: &SeriesKey, e: csv::Error) -> MigratorError {
    if e.is_io_error() {
        MigratorError::Io {
            reason: format!("{series}: {e}"),
        }
    } else {
        MigratorError::SourceData {
            series: series.to_string(),
            reason: e.to_string(),
        }
    }
}

fn open_series(path: &Path) -> Result<Option<csv::Reader<File>>, MigratorError> {
    match File::open(path) {
        Ok(file) => Ok(Some(csv::Reader::from_reader(file))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MigratorError::Io {
            reason: format!("failed to open {}: {e}", path.display()),
        }),
    }
}

/// Read one page starting at `cursor`, or from the top of the file filtered
/// by `after` when there is no cursor yet.
fn read_page(
    path: &Path,
    series: &SeriesKey,
    after: LowerBound,
    end: DateTime<Utc>,
    cursor: Option<csv::Position>,
    limit: usize,
) -> Result<Page<Option<csv::Position>>, MigratorError> {
    let Some(mut reader) = open_series(path)? else {
        return Ok(Page {
            candles: Vec::new(),
            cursor,
        });
    };
    let headers = reader.headers().map_err(|e| csv_error(series, e))?.clone();
    let resuming = cursor.is_some();
    if let Some(pos) = cursor {
        reader.seek(pos).map_err(|e| csv_error(series, e))?;
    }

    let mut candles = Vec::with_capacity(limit.min(4096));
    let mut record = csv::StringRecord::new();
    loop {
        let start = reader.position().clone();
        if candles.len() >= limit {
            return Ok(Page {
                candles,
                cursor: Some(start),
            });
        }
        if !reader.read_record(&mut record).map_err(|e| csv_error(series, e))? {
            return Ok(Page {
                candles,
                cursor: Some(start),
            });
        }
        let row: CsvCandle = record
            .deserialize(Some(&headers))
            .map_err(|e| csv_error(series, e))?;
        if row.timestamp >= end {
            return Ok(Page {
                candles,
                cursor: Some(start),
            });
        }
        if !resuming && !after.admits(row.timestamp) {
            continue;
        }
        candles.push(row.into());
    }
}

#[async_trait]
impl PageSource for CsvHistoryProvider {
    type Cursor = Option<csv::Position>;

    fn source_name(&self) -> &'static str {
        "csv"
    }

    async fn fetch_page(
        &self,
        request: &HistoryRequest,
        after: LowerBound,
        cursor: Self::Cursor,
        limit: usize,
    ) -> Result<Page<Self::Cursor>, MigratorError> {
        let series = request.series();
        let path = self.csv_path(&series);
        let end = request.end;
        tokio::task::spawn_blocking(move || read_page(&path, &series, after, end, cursor, limit))
            .await
            .map_err(|e| MigratorError::Io {
                reason: format!("csv read task failed: {e}"),
            })?
    }
}

#[async_trait]
impl HistoryProvider for CsvHistoryProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Csv
    }

    async fn get_start_date(
        &self,
        asset_pair: &AssetPair,
        price_type: PriceType,
        interval: TimeInterval,
    ) -> Result<Option<DateTime<Utc>>, MigratorError> {
        let series = SeriesKey::new(asset_pair.id(), price_type, interval);
        let path = self.csv_path(&series);
        tokio::task::spawn_blocking(move || {
            let Some(mut reader) = open_series(&path)? else {
                return Ok(None);
            };
            match reader.deserialize::<CsvCandle>().next() {
                Some(row) => Ok(Some(row.map_err(|e| csv_error(&series, e))?.timestamp)),
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| MigratorError::Io {
            reason: format!("csv read task failed: {e}"),
        })?
    }

    async fn get_history_by_chunks(
        &self,
        request: &HistoryRequest,
        on_chunk: &mut dyn ChunkHandler,
        cancel: &CancellationToken,
    ) -> Result<ChunkStats, MigratorError> {
        drive_chunks(self, request, self.chunk_size, &self.retry, on_chunk, cancel).await
    }
}
