//! Migration driver: validates a request, then streams every series of every
//! asset pair from a history provider into the candle sink, checkpointing
//! after each ingested chunk.

use crate::domain::asset_pair::AssetPair;
use crate::domain::candle::{Candle, PriceType, SeriesKey, TimeInterval};
use crate::domain::chunking::{HistoryRequest, LowerBound};
use crate::domain::error::MigratorError;
use crate::domain::migration::{
    ItemReport, MIGRATION_NAMESPACE, MigrationItem, MigrationReport, MigrationRequest,
    SeriesCheckpoint, SeriesOutcome, SeriesReport,
};
use crate::domain::registry::{HistoryProviderRegistry, ProviderType};
use crate::domain::snapshot::SnapshotStore;
use crate::ports::asset_metadata::AssetMetadata;
use crate::ports::candle_sink::CandleSink;
use crate::ports::history_provider::{ChunkHandler, HistoryProvider};
use crate::ports::snapshot_backend::SnapshotBackend;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

pub struct MigrationEngine {
    registry: HistoryProviderRegistry,
    metadata: Arc<dyn AssetMetadata>,
    sink: Arc<dyn CandleSink>,
    checkpoints: SnapshotStore<SeriesCheckpoint>,
    max_concurrency: usize,
}

impl MigrationEngine {
    pub fn new(
        registry: HistoryProviderRegistry,
        metadata: Arc<dyn AssetMetadata>,
        sink: Arc<dyn CandleSink>,
        snapshots: Arc<dyn SnapshotBackend>,
    ) -> Self {
        Self {
            registry,
            metadata,
            sink,
            checkpoints: SnapshotStore::new(snapshots, MIGRATION_NAMESPACE),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    /// Upper bound on asset pairs processed at once. Clamped to at least 1.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn registry(&self) -> &HistoryProviderRegistry {
        &self.registry
    }

    /// Resolve every asset pair in the request. Fails with
    /// `UnknownAssetPair` on the first pair that is missing or disabled.
    pub async fn validate(&self, request: &MigrationRequest) -> Result<Vec<MigrationItem>, MigratorError> {
        request.validate()?;
        let scope = request.series_scope();
        let mut items: Vec<MigrationItem> = Vec::with_capacity(request.asset_pairs.len());
        for id in &request.asset_pairs {
            let pair = self.resolve_pair(id).await?;
            if items.iter().any(|i| i.asset_pair.id() == pair.id()) {
                continue;
            }
            items.push(MigrationItem {
                asset_pair: pair,
                series: scope.clone(),
            });
        }
        Ok(items)
    }

    async fn resolve_pair(&self, id: &str) -> Result<AssetPair, MigratorError> {
        match self.metadata.lookup(id.trim()).await? {
            Some(info) if info.enabled => Ok(info.pair),
            Some(_) => Err(MigratorError::UnknownAssetPair {
                id: id.to_string(),
                reason: "asset pair is disabled".into(),
            }),
            None => Err(MigratorError::UnknownAssetPair {
                id: id.to_string(),
                reason: "asset pair not found".into(),
            }),
        }
    }

    /// Run a migration to completion or cancellation.
    ///
    /// Request-level problems (bad range, unknown pair) are returned as
    /// `Err`. Everything after validation is reported per item: a provider
    /// that is not registered, an unavailable source or a failed checkpoint
    /// write fails the affected items without touching their siblings.
    pub async fn migrate(
        &self,
        request: &MigrationRequest,
        cancel: &CancellationToken,
    ) -> Result<MigrationReport, MigratorError> {
        let items = self.validate(request).await?;
        info!(
            provider = %request.provider,
            items = items.len(),
            from = %request.from,
            to = %request.to,
            "migration started"
        );

        let provider = self.registry.resolve(request.provider);
        let reports: Vec<ItemReport> = stream::iter(items)
            .map(|item| {
                let provider = provider.clone();
                async move {
                    match provider {
                        Ok(provider) => self.migrate_item(provider, item, request, cancel).await,
                        Err(err) => failed_item(&item, err),
                    }
                }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut report = MigrationReport::default();
        for item in reports {
            report.items.insert(item.asset_pair.clone(), item);
        }
        info!(
            items = report.items.len(),
            failed = report.failed(),
            candles = report.total_candles(),
            "migration finished"
        );
        Ok(report)
    }

    async fn migrate_item(
        &self,
        provider: Arc<dyn HistoryProvider>,
        item: MigrationItem,
        request: &MigrationRequest,
        cancel: &CancellationToken,
    ) -> ItemReport {
        let mut series_reports = Vec::with_capacity(item.series.len());
        for &(price_type, interval) in &item.series {
            let key = SeriesKey::new(item.asset_pair.id(), price_type, interval);
            if cancel.is_cancelled() {
                series_reports.push(SeriesReport {
                    series: key,
                    outcome: SeriesOutcome::Cancelled,
                    candles: 0,
                    last_timestamp: None,
                });
                continue;
            }
            let report = self
                .migrate_series(provider.as_ref(), &item, price_type, interval, request, cancel)
                .await;
            if let SeriesOutcome::Failed(err) = &report.outcome {
                warn!(
                    series = %report.series,
                    error = %err,
                    kind = err.kind(),
                    "series migration failed"
                );
            }
            series_reports.push(report);
        }
        ItemReport::from_series(item.asset_pair.id(), series_reports)
    }

    async fn migrate_series(
        &self,
        provider: &dyn HistoryProvider,
        item: &MigrationItem,
        price_type: PriceType,
        interval: TimeInterval,
        request: &MigrationRequest,
        cancel: &CancellationToken,
    ) -> SeriesReport {
        let key = SeriesKey::new(item.asset_pair.id(), price_type, interval);
        let mut ingestor = SeriesIngestor {
            sink: Arc::clone(&self.sink),
            checkpoints: self.checkpoints.clone(),
            pair: item.asset_pair.clone(),
            series: key.clone(),
            checkpoint: SeriesCheckpoint::empty(Utc::now()),
            ingested: 0,
        };

        let outcome = match self
            .run_series(provider, &mut ingestor, request, interval, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => SeriesOutcome::Failed(err),
        };

        SeriesReport {
            series: key,
            outcome,
            candles: ingestor.ingested,
            last_timestamp: ingestor.checkpoint.last_timestamp,
        }
    }

    async fn run_series(
        &self,
        provider: &dyn HistoryProvider,
        ingestor: &mut SeriesIngestor,
        request: &MigrationRequest,
        interval: TimeInterval,
        cancel: &CancellationToken,
    ) -> Result<SeriesOutcome, MigratorError> {
        let storage_key = ingestor.series.to_string();
        let end = request.end_for(interval);

        let stored = self.checkpoints.try_get(&storage_key).await?;
        let resume = match &stored {
            Some(cp) => cp.resume_point(request.from, end),
            None => self
                .sink
                .last_ingested(&ingestor.series)
                .await?
                .filter(|last| *last >= request.from && *last < end),
        };
        if let Some(cp) = stored {
            ingestor.checkpoint = cp;
        }

        let lower = match resume {
            Some(last) => {
                if ingestor.checkpoint.covered_from.is_none() {
                    ingestor.checkpoint.covered_from = Some(request.from);
                    ingestor.checkpoint.last_timestamp = Some(last);
                }
                LowerBound::Exclusive(last)
            }
            None => {
                ingestor.checkpoint.restart(request.from);
                let start = provider
                    .get_start_date(&ingestor.pair, ingestor.series.price_type, interval)
                    .await?;
                match start {
                    Some(start) => LowerBound::Inclusive(start.max(request.from)),
                    None => {
                        info!(series = %ingestor.series, "source holds no data for series");
                        ingestor.checkpoint.complete(end, Utc::now());
                        self.checkpoints.save(&storage_key, &ingestor.checkpoint).await?;
                        return Ok(SeriesOutcome::Succeeded);
                    }
                }
            }
        };

        let history = HistoryRequest {
            asset_pair: ingestor.pair.clone(),
            price_type: ingestor.series.price_type,
            interval,
            lower,
            end,
        };
        info!(
            series = %ingestor.series,
            provider = %provider.provider_type(),
            lower = ?lower,
            end = %end,
            "series migration started"
        );

        let stats = provider.get_history_by_chunks(&history, ingestor, cancel).await?;
        if stats.cancelled {
            info!(series = %ingestor.series, chunks = stats.chunks, "series migration cancelled");
            return Ok(SeriesOutcome::Cancelled);
        }

        ingestor.checkpoint.complete(end, Utc::now());
        self.checkpoints.save(&storage_key, &ingestor.checkpoint).await?;
        info!(
            series = %ingestor.series,
            chunks = stats.chunks,
            candles = stats.candles,
            "series migration completed"
        );
        Ok(SeriesOutcome::Succeeded)
    }

    /// Stored progress for one series.
    pub async fn checkpoint(&self, series: &SeriesKey) -> Result<Option<SeriesCheckpoint>, MigratorError> {
        self.checkpoints.try_get(&series.to_string()).await
    }

    /// Earliest timestamp a provider holds for a series of a known pair.
    pub async fn start_date(
        &self,
        provider: ProviderType,
        asset_pair: &str,
        price_type: PriceType,
        interval: TimeInterval,
    ) -> Result<Option<DateTime<Utc>>, MigratorError> {
        let pair = self.resolve_pair(asset_pair).await?;
        let provider = self.registry.resolve(provider)?;
        provider.get_start_date(&pair, price_type, interval).await
    }
}

fn failed_item(item: &MigrationItem, err: MigratorError) -> ItemReport {
    let series = item
        .series
        .iter()
        .map(|&(price_type, interval)| SeriesReport {
            series: SeriesKey::new(item.asset_pair.id(), price_type, interval),
            outcome: SeriesOutcome::Failed(err.clone()),
            candles: 0,
            last_timestamp: None,
        })
        .collect();
    ItemReport::from_series(item.asset_pair.id(), series)
}

/// Chunk handler for one series: round, ingest, then checkpoint. The
/// checkpoint only advances once the sink accepted the whole chunk.
struct SeriesIngestor {
    sink: Arc<dyn CandleSink>,
    checkpoints: SnapshotStore<SeriesCheckpoint>,
    pair: AssetPair,
    series: SeriesKey,
    checkpoint: SeriesCheckpoint,
    ingested: u64,
}

#[async_trait]
impl ChunkHandler for SeriesIngestor {
    async fn on_chunk(&mut self, chunk: &[Candle]) -> Result<(), MigratorError> {
        let Some(last) = chunk.last().map(|c| c.timestamp) else {
            return Ok(());
        };
        let rounded: Vec<Candle> = chunk.iter().map(|c| c.rounded_for(&self.pair)).collect();
        self.sink.ingest(&self.series, &rounded).await?;
        self.ingested += rounded.len() as u64;

        let next = SeriesCheckpoint {
            last_timestamp: Some(last),
            candles_ingested: self.checkpoint.candles_ingested + rounded.len() as u64,
            updated_at: Utc::now(),
            ..self.checkpoint.clone()
        };
        self.checkpoints.save(&self.series.to_string(), &next).await?;
        self.checkpoint = next;
        Ok(())
    }
}
