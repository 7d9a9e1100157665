//! Concrete adapter implementations for ports, plus the wiring that builds
//! them from configuration.

pub mod config_assets;
pub mod csv_history;
pub mod file_config_adapter;
pub mod file_snapshot;
#[cfg(feature = "postgres")]
pub mod postgres_history;
pub mod sqlite_candle_store;
pub mod sqlite_history;
pub mod sqlite_pool;
pub mod sqlite_snapshot;
pub mod stdin_events;

use crate::domain::error::MigratorError;
use crate::domain::registry::HistoryProviderRegistry;
use crate::domain::settings::MigrationSettings;
use crate::ports::config_port::ConfigPort;
use crate::ports::snapshot_backend::SnapshotBackend;
use std::sync::Arc;
use tracing::debug;

/// Register a provider for every archive the config describes: `[sqlite]
/// path`, `[csv] path`, and with the `postgres` feature a Postgres
/// connection string.
pub fn registry_from_config(
    config: &dyn ConfigPort,
    settings: &MigrationSettings,
) -> Result<HistoryProviderRegistry, MigratorError> {
    let mut registry = HistoryProviderRegistry::new();

    if config.get_string("sqlite", "path").is_some() {
        let provider = sqlite_history::SqliteHistoryProvider::from_config(config, settings)?;
        registry = registry.with_provider(Arc::new(provider));
    }
    if config.get_string("csv", "path").is_some() {
        let provider = csv_history::CsvHistoryProvider::from_config(config, settings)?;
        registry = registry.with_provider(Arc::new(provider));
    }
    #[cfg(feature = "postgres")]
    {
        if config.get_string("postgres", "connection_string").is_some()
            || config.get_string("database", "conninfo").is_some()
        {
            let provider = postgres_history::PostgresHistoryProvider::from_config(config, settings)?;
            registry = registry.with_provider(Arc::new(provider));
        }
    }

    debug!(providers = ?registry.registered(), "history providers registered");
    Ok(registry)
}

/// `[snapshots] backend` is `sqlite` (default) or `file`; `path` is the
/// database file or the snapshot directory.
pub async fn snapshot_backend_from_config(
    config: &dyn ConfigPort,
) -> Result<Arc<dyn SnapshotBackend>, MigratorError> {
    let path = config
        .get_string("snapshots", "path")
        .ok_or_else(|| MigratorError::ConfigMissing {
            section: "snapshots".into(),
            key: "path".into(),
        })?;
    let backend = config
        .get_string("snapshots", "backend")
        .unwrap_or_else(|| "sqlite".to_string());

    match backend.trim().to_lowercase().as_str() {
        "sqlite" => {
            let backend = sqlite_snapshot::SqliteSnapshotBackend::open(&path)?;
            backend.initialize_schema().await?;
            Ok(Arc::new(backend))
        }
        "file" => Ok(Arc::new(file_snapshot::FileSnapshotBackend::open(&path)?)),
        other => Err(MigratorError::ConfigInvalid {
            section: "snapshots".into(),
            key: "backend".into(),
            reason: format!("unknown snapshot backend '{other}', expected sqlite or file"),
        }),
    }
}

pub async fn candle_store_from_config(
    config: &dyn ConfigPort,
) -> Result<Arc<sqlite_candle_store::SqliteCandleStore>, MigratorError> {
    let store = sqlite_candle_store::SqliteCandleStore::from_config(config)?;
    store.initialize_schema().await?;
    Ok(Arc::new(store))
}
