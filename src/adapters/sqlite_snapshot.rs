//! SQLite snapshot backend.

use crate::adapters::sqlite_pool::{SqlitePool, file_pool, memory_pool, sql_error, with_conn};
use crate::domain::error::MigratorError;
use crate::ports::snapshot_backend::SnapshotBackend;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{OptionalExtension, params};

const SNAPSHOT_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS snapshots (
        key TEXT PRIMARY KEY,
        payload TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    );";

pub struct SqliteSnapshotBackend {
    pool: SqlitePool,
}

impl SqliteSnapshotBackend {
    pub fn open(path: &str) -> Result<Self, MigratorError> {
        Ok(Self {
            pool: file_pool(path, 2)?,
        })
    }

    pub fn in_memory() -> Result<Self, MigratorError> {
        Ok(Self { pool: memory_pool()? })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn initialize_schema(&self) -> Result<(), MigratorError> {
        with_conn(&self.pool, |conn| conn.execute_batch(SNAPSHOT_SCHEMA).map_err(sql_error)).await
    }
}

#[async_trait]
impl SnapshotBackend for SqliteSnapshotBackend {
    async fn write(&self, key: &str, payload: &str) -> Result<(), MigratorError> {
        let key = key.to_string();
        let payload = payload.to_string();
        with_conn(&self.pool, move |conn| {
            let tx = conn.transaction().map_err(sql_error)?;
            tx.execute(
                "INSERT OR REPLACE INTO snapshots (key, payload, updated_at) VALUES (?1, ?2, ?3)",
                params![key, payload, Utc::now().timestamp_millis()],
            )
            .map_err(sql_error)?;
            tx.commit().map_err(sql_error)
        })
        .await
    }

    async fn read(&self, key: &str) -> Result<Option<String>, MigratorError> {
        let key = key.to_string();
        with_conn(&self.pool, move |conn| {
            conn.query_row(
                "SELECT payload FROM snapshots WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_error)
        })
        .await
    }
}
