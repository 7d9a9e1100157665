//! PostgreSQL-backed historical archive.

use crate::domain::asset_pair::AssetPair;
use crate::domain::candle::{Candle, PriceType, TimeInterval};
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
use postgres::types::ToSql;
use postgres::{Client, NoTls};
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;
use tokio_util::sync::CancellationToken;

type PgPool = Pool<PostgresConnectionManager<NoTls>>;

pub struct PostgresHistoryProvider {
    pool: PgPool,
    chunk_size: usize,
    retry: RetryPolicy,
}

/// Server-side errors (bad SQL, missing table) are permanent; anything
/// without a database error body is a connection problem.
fn pg_error(e: postgres::Error) -> MigratorError {
    if e.as_db_error().is_some() {
        MigratorError::DatabaseQuery {
            reason: e.to_string(),
        }
    } else {
        MigratorError::Database {
            reason: e.to_string(),
        }
    }
}

impl PostgresHistoryProvider {
    pub fn from_config(config: &dyn ConfigPort, settings: &MigrationSettings) -> Result<Self, MigratorError> {
        let connection_string = config
            .get_string("postgres", "connection_string")
            .or_else(|| config.get_string("database", "conninfo"))
            .ok_or_else(|| MigratorError::ConfigMissing {
                section: "database".into(),
                key: "conninfo".into(),
            })?;
        let pg_config: postgres::Config =
            connection_string
                .parse()
                .map_err(|e: postgres::Error| MigratorError::ConfigInvalid {
                    section: "postgres".into(),
                    key: "connection_string".into(),
                    reason: e.to_string(),
                })?;
        let pool_size = settings::pool_size(config, "postgres")?;
        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        // Connections are opened lazily so an unreachable server surfaces as a
        // retryable error on first use.
        let pool = Pool::builder().max_size(pool_size).build_unchecked(manager);

        Ok(Self {
            pool,
            chunk_size: settings.chunk_size,
            retry: settings.retry.clone(),
        })
    }

    async fn with_client<T, F>(&self, f: F) -> Result<T, MigratorError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Client) -> Result<T, MigratorError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut client = pool.get().map_err(|e: r2d2::Error| MigratorError::Database {
                reason: e.to_string(),
            })?;
            f(&mut client)
        })
        .await
        .map_err(|e| MigratorError::DatabaseQuery {
            reason: format!("postgres task failed: {e}"),
        })?
    }
}

#[async_trait]
impl PageSource for PostgresHistoryProvider {
    type Cursor = ();

    fn source_name(&self) -> &'static str {
        "postgres"
    }

    async fn fetch_page(
        &self,
        request: &HistoryRequest,
        after: LowerBound,
        _cursor: (),
        limit: usize,
    ) -> Result<Page<()>, MigratorError> {
        let series = request.series();
        let end = request.end;
        let candles = self
            .with_client(move |client| {
                let mut query = String::from(
                    "SELECT ts, open::double precision, high::double precision, \
                            low::double precision, close::double precision, \
                            volume::double precision, opposite_volume::double precision, \
                            last_trade_price::double precision \
                     FROM public.candles \
                     WHERE asset_pair = $1 AND price_type = $2 AND interval = $3 AND ts < $4",
                );
                let price_type = series.price_type.as_str();
                let interval = series.interval.as_str();
                let limit = limit as i64;
                let bound: Option<DateTime<Utc>> = match after {
                    LowerBound::Earliest => None,
                    LowerBound::Inclusive(ts) => {
                        query.push_str(" AND ts >= $6");
                        Some(ts)
                    }
                    LowerBound::Exclusive(ts) => {
                        query.push_str(" AND ts > $6");
                        Some(ts)
                    }
                };
                query.push_str(" ORDER BY ts ASC LIMIT $5");

                let mut params: Vec<&(dyn ToSql + Sync)> =
                    vec![&series.asset_pair, &price_type, &interval, &end, &limit];
                if let Some(bound) = bound.as_ref() {
                    params.push(bound);
                }

                let rows = client.query(query.as_str(), &params).map_err(pg_error)?;
                Ok(rows
                    .into_iter()
                    .map(|row| Candle {
                        timestamp: row.get(0),
                        open: row.get(1),
                        high: row.get(2),
                        low: row.get(3),
                        close: row.get(4),
                        trading_volume: row.get(5),
                        opposite_volume: row.get(6),
                        last_trade_price: row.get(7),
                    })
                    .collect::<Vec<_>>())
            })
            .await?;
        Ok(Page { candles, cursor: () })
    }
}

#[async_trait]
impl HistoryProvider for PostgresHistoryProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Postgres
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
            self.with_client(move |client| {
                let row = client
                    .query_one(
                        "SELECT MIN(ts) FROM public.candles \
                         WHERE asset_pair = $1 AND price_type = $2 AND interval = $3",
                        &[&pair, &price_type.as_str(), &interval.as_str()],
                    )
                    .map_err(pg_error)?;
                Ok(row.get::<_, Option<DateTime<Utc>>>(0))
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
