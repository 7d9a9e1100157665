//! Shared SQLite plumbing: pool construction, candle table schema, row
//! mapping and blocking-call dispatch.

use crate::domain::candle::Candle;
use crate::domain::error::MigratorError;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, ErrorCode, Row};

pub type SqlitePool = Pool<SqliteConnectionManager>;

pub const CANDLE_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS candles (
        asset_pair TEXT NOT NULL,
        price_type TEXT NOT NULL,
        interval TEXT NOT NULL,
        ts INTEGER NOT NULL,
        open REAL NOT NULL,
        high REAL NOT NULL,
        low REAL NOT NULL,
        close REAL NOT NULL,
        volume REAL NOT NULL,
        opposite_volume REAL NOT NULL,
        last_trade_price REAL NOT NULL,
        PRIMARY KEY (asset_pair, price_type, interval, ts)
    );";

pub const CANDLE_COLUMNS: &str =
    "ts, open, high, low, close, volume, opposite_volume, last_trade_price";

pub fn file_pool(path: &str, pool_size: u32) -> Result<SqlitePool, MigratorError> {
    let manager = SqliteConnectionManager::file(path);
    Pool::builder()
        .max_size(pool_size.max(1))
        .build(manager)
        .map_err(|e: r2d2::Error| MigratorError::Database {
            reason: e.to_string(),
        })
}

/// Each in-memory connection is its own database, so the pool holds one.
pub fn memory_pool() -> Result<SqlitePool, MigratorError> {
    let manager = SqliteConnectionManager::memory();
    Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e: r2d2::Error| MigratorError::Database {
            reason: e.to_string(),
        })
}

/// Busy and locked databases are retryable; everything else is a query error.
pub fn sql_error(e: rusqlite::Error) -> MigratorError {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => MigratorError::Database {
            reason: e.to_string(),
        },
        _ => MigratorError::DatabaseQuery {
            reason: e.to_string(),
        },
    }
}

/// Run `f` against a pooled connection on the blocking thread pool.
pub async fn with_conn<T, F>(pool: &SqlitePool, f: F) -> Result<T, MigratorError>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T, MigratorError> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(|e: r2d2::Error| MigratorError::Database {
            reason: e.to_string(),
        })?;
        f(&mut conn)
    })
    .await
    .map_err(|e| MigratorError::DatabaseQuery {
        reason: format!("sqlite task failed: {e}"),
    })?
}

pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn from_millis(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(0, ms))
}

/// Maps a row selected with [`CANDLE_COLUMNS`].
pub fn candle_from_row(row: &Row<'_>) -> rusqlite::Result<Candle> {
    Ok(Candle {
        timestamp: from_millis(row.get(0)?)?,
        open: row.get(1)?,
        high: row.get(2)?,
        low: row.get(3)?,
        close: row.get(4)?,
        trading_volume: row.get(5)?,
        opposite_volume: row.get(6)?,
        last_trade_price: row.get(7)?,
    })
}
