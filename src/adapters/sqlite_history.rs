//! SQLite-backed historical archive.

use crate::adapters::sqlite_pool::{
    CANDLE_COLUMNS, CANDLE_SCHEMA, SqlitePool, candle_from_row, file_pool, from_millis,
    memory_pool, sql_error, to_millis, with_conn,
};
use crate::domain::asset_pair::AssetPair;
use crate::domain::candle::{PriceType, TimeInterval};
use crate::domain::chunking::{
    ChunkStats, HistoryRequest, LowerBound, Page, PageSource, RetryPolicy, drive_chunks,
};
use crate::domain::error::MigratorError;
use crate::domain::registry::ProviderType;
use crate::domain::settings::{self, MigrationSettings};
use crate::ports::config_port::ConfigPort;
use crate::ports::history_provider::{ChunkHandler, HistoryProvider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use tokio_util::sync::CancellationToken;

pub struct SqliteHistoryProvider {
    pool: SqlitePool,
    chunk_size: usize,
    retry: RetryPolicy,
}

impl SqliteHistoryProvider {
    pub fn from_config(config: &dyn ConfigPort, settings: &MigrationSettings) -> Result<Self, MigratorError> {
        let db_path = config
            .get_string("sqlite", "path")
            .ok_or_else(|| MigratorError::ConfigMissing {
                section: "sqlite".into(),
                key: "path".into(),
            })?;
        let pool_size = settings::pool_size(config, "sqlite")?;
        Ok(Self::from_pool(file_pool(&db_path, pool_size)?, settings))
    }

    pub fn in_memory(settings: &MigrationSettings) -> Result<Self, MigratorError> {
        Ok(Self::from_pool(memory_pool()?, settings))
    }

    pub fn from_pool(pool: SqlitePool, settings: &MigrationSettings) -> Self {
        Self {
            pool,
            chunk_size: settings.chunk_size,
            retry: settings.retry.clone(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn initialize_schema(&self) -> Result<(), MigratorError> {
        with_conn(&self.pool, |conn| conn.execute_batch(CANDLE_SCHEMA).map_err(sql_error)).await
    }
}

#[async_trait]
impl PageSource for SqliteHistoryProvider {
    type Cursor = ();

    fn source_name(&self) -> &'static str {
        "sqlite"
    }

    async fn fetch_page(
        &self,
        request: &HistoryRequest,
        after: LowerBound,
        _cursor: (),
        limit: usize,
    ) -> Result<Page<()>, MigratorError> {
        let series = request.series();
        let end = to_millis(request.end);

        let mut query = format!(
            "SELECT {CANDLE_COLUMNS} FROM candles
             WHERE asset_pair = ?1 AND price_type = ?2 AND interval = ?3 AND ts < ?4"
        );
        let mut args: Vec<Value> = vec![
            Value::Text(series.asset_pair),
            Value::Text(series.price_type.as_str().into()),
            Value::Text(series.interval.as_str().into()),
            Value::Integer(end),
        ];
        match after {
            LowerBound::Earliest => {}
            LowerBound::Inclusive(ts) => {
                query.push_str(" AND ts >= ?5");
                args.push(Value::Integer(to_millis(ts)));
            }
            LowerBound::Exclusive(ts) => {
                query.push_str(" AND ts > ?5");
                args.push(Value::Integer(to_millis(ts)));
            }
        }
        query.push_str(&format!(" ORDER BY ts ASC LIMIT {limit}"));

        let candles = with_conn(&self.pool, move |conn| {
            let mut stmt = conn.prepare(&query).map_err(sql_error)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(args), candle_from_row)
                .map_err(sql_error)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sql_error)
        })
        .await?;

        Ok(Page { candles, cursor: () })
    }
}

#[async_trait]
impl HistoryProvider for SqliteHistoryProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Sqlite
    }

    async fn get_start_date(
        &self,
        asset_pair: &AssetPair,
        price_type: PriceType,
        interval: TimeInterval,
    ) -> Result<Option<DateTime<Utc>>, MigratorError> {
        let pair = asset_pair.id().to_string();
        let op = || {
            let pair = pair.clone();
            with_conn(&self.pool, move |conn| {
                let min: Option<i64> = conn
                    .query_row(
                        "SELECT MIN(ts) FROM candles WHERE asset_pair = ?1 AND price_type = ?2 AND interval = ?3",
                        rusqlite::params![pair, price_type.as_str(), interval.as_str()],
                        |row| row.get(0),
                    )
                    .map_err(sql_error)?;
                min.map(from_millis).transpose().map_err(sql_error)
            })
        };
        let never = CancellationToken::new();
        Ok(self.retry.run(self.source_name(), &never, op).await?.flatten())
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
