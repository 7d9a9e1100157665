//! SQLite candle store: the sink migrated candles are written to.

use crate::adapters::sqlite_pool::{
    CANDLE_COLUMNS, CANDLE_SCHEMA, SqlitePool, candle_from_row, file_pool, from_millis,
    memory_pool, sql_error, to_millis, with_conn,
};
use crate::domain::candle::{Candle, PriceType, SeriesKey, TimeInterval};
use crate::domain::error::MigratorError;
use crate::domain::settings;
use crate::ports::candle_sink::CandleSink;
use crate::ports::config_port::ConfigPort;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;

pub struct SqliteCandleStore {
    pool: SqlitePool,
}

impl SqliteCandleStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, MigratorError> {
        let db_path = config
            .get_string("store", "path")
            .ok_or_else(|| MigratorError::ConfigMissing {
                section: "store".into(),
                key: "path".into(),
            })?;
        let pool_size = settings::pool_size(config, "store")?;
        Ok(Self {
            pool: file_pool(&db_path, pool_size)?,
        })
    }

    pub fn in_memory() -> Result<Self, MigratorError> {
        Ok(Self { pool: memory_pool()? })
    }

    /// Share a pool with another adapter over the same database.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn initialize_schema(&self) -> Result<(), MigratorError> {
        with_conn(&self.pool, |conn| {
            conn.execute_batch(CANDLE_SCHEMA).map_err(sql_error)
        })
        .await
    }

    /// Every stored candle of a series in timestamp order.
    pub async fn load(&self, series: &SeriesKey) -> Result<Vec<Candle>, MigratorError> {
        let series = series.clone();
        with_conn(&self.pool, move |conn| {
            let query = format!(
                "SELECT {CANDLE_COLUMNS} FROM candles
                 WHERE asset_pair = ?1 AND price_type = ?2 AND interval = ?3
                 ORDER BY ts ASC"
            );
            let mut stmt = conn.prepare(&query).map_err(sql_error)?;
            let rows = stmt
                .query_map(
                    params![series.asset_pair, series.price_type.as_str(), series.interval.as_str()],
                    candle_from_row,
                )
                .map_err(sql_error)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sql_error)
        })
        .await
    }
}

#[async_trait]
impl CandleSink for SqliteCandleStore {
    async fn ingest(&self, series: &SeriesKey, candles: &[Candle]) -> Result<u64, MigratorError> {
        let series = series.clone();
        let candles = candles.to_vec();
        with_conn(&self.pool, move |conn| {
            let tx = conn.transaction().map_err(sql_error)?;
            let mut written = 0u64;
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT OR REPLACE INTO candles (asset_pair, price_type, interval, ts, open, high, low, close, volume, opposite_volume, last_trade_price)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    )
                    .map_err(sql_error)?;
                for candle in &candles {
                    written += stmt
                        .execute(params![
                            series.asset_pair,
                            series.price_type.as_str(),
                            series.interval.as_str(),
                            to_millis(candle.timestamp),
                            candle.open,
                            candle.high,
                            candle.low,
                            candle.close,
                            candle.trading_volume,
                            candle.opposite_volume,
                            candle.last_trade_price,
                        ])
                        .map_err(sql_error)? as u64;
                }
            }
            tx.commit().map_err(sql_error)?;
            Ok(written)
        })
        .await
        .map_err(|e| match e {
            MigratorError::DatabaseQuery { reason } => MigratorError::Sink { reason },
            other => other,
        })
    }

    async fn last_ingested(&self, series: &SeriesKey) -> Result<Option<DateTime<Utc>>, MigratorError> {
        let series = series.clone();
        with_conn(&self.pool, move |conn| {
            let max: Option<i64> = conn
                .query_row(
                    "SELECT MAX(ts) FROM candles WHERE asset_pair = ?1 AND price_type = ?2 AND interval = ?3",
                    params![series.asset_pair, series.price_type.as_str(), series.interval.as_str()],
                    |row| row.get(0),
                )
                .map_err(sql_error)?;
            max.map(from_millis).transpose().map_err(sql_error)
        })
        .await
    }

    async fn list_series(&self) -> Result<Vec<SeriesKey>, MigratorError> {
        with_conn(&self.pool, |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT DISTINCT asset_pair, price_type, interval FROM candles
                     ORDER BY asset_pair, price_type, interval",
                )
                .map_err(sql_error)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                })
                .map_err(sql_error)?;

            let mut series = Vec::new();
            for row in rows {
                let (pair, price_type, interval) = row.map_err(sql_error)?;
                let price_type: PriceType = price_type
                    .parse()
                    .map_err(|reason| MigratorError::DatabaseQuery { reason })?;
                let interval: TimeInterval = interval
                    .parse()
                    .map_err(|reason| MigratorError::DatabaseQuery { reason })?;
                series.push(SeriesKey::new(pair, price_type, interval));
            }
            Ok(series)
        })
        .await
    }

    async fn purge_before(&self, series: &SeriesKey, cutoff: DateTime<Utc>) -> Result<u64, MigratorError> {
        let series = series.clone();
        with_conn(&self.pool, move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM candles WHERE asset_pair = ?1 AND price_type = ?2 AND interval = ?3 AND ts < ?4",
                    params![
                        series.asset_pair,
                        series.price_type.as_str(),
                        series.interval.as_str(),
                        to_millis(cutoff)
                    ],
                )
                .map_err(sql_error)?;
            Ok(removed as u64)
        })
        .await
    }
}
