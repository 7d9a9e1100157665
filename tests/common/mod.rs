#![allow(dead_code)]

use async_trait::async_trait;
use candle_migrator::adapters::config_assets::ConfigAssetMetadata;
use candle_migrator::domain::asset_pair::AssetPair;
use candle_migrator::domain::candle::{Candle, PriceType, SeriesKey, TimeInterval};
use candle_migrator::domain::chunking::{
    ChunkStats, HistoryRequest, LowerBound, Page, PageSource, RetryPolicy, drive_chunks,
};
use candle_migrator::domain::error::MigratorError;
use candle_migrator::domain::registry::{HistoryProviderRegistry, ProviderType};
use candle_migrator::ports::asset_metadata::AssetPairInfo;
use candle_migrator::ports::candle_sink::CandleSink;
use candle_migrator::ports::history_provider::{ChunkHandler, HistoryProvider};
use candle_migrator::ports::snapshot_backend::SnapshotBackend;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn ts(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

pub fn make_candle(timestamp: DateTime<Utc>, price: f64) -> Candle {
    Candle {
        timestamp,
        open: price,
        high: price + 1.0,
        low: price - 1.0,
        close: price + 0.5,
        trading_volume: 10.0,
        opposite_volume: 10.0 * price,
        last_trade_price: price + 0.5,
    }
}

/// `count` consecutive candles of `interval` starting at `start`.
pub fn series_candles(start: DateTime<Utc>, interval: TimeInterval, count: usize) -> Vec<Candle> {
    (0..count)
        .map(|i| make_candle(start + interval.duration() * i as i32, 100.0 + i as f64))
        .collect()
}

pub fn hourly_candles(start: DateTime<Utc>, count: usize) -> Vec<Candle> {
    series_candles(start, TimeInterval::Hour, count)
}

pub fn assets(pairs: &[(&str, i64)]) -> Arc<ConfigAssetMetadata> {
    Arc::new(ConfigAssetMetadata::new(pairs.iter().map(|&(id, accuracy)| {
        AssetPairInfo {
            pair: AssetPair::new(id, accuracy).unwrap(),
            enabled: true,
        }
    })))
}

pub fn assets_with_disabled(pairs: &[(&str, i64)], disabled: &[&str]) -> Arc<ConfigAssetMetadata> {
    Arc::new(ConfigAssetMetadata::new(pairs.iter().map(|&(id, accuracy)| {
        AssetPairInfo {
            pair: AssetPair::new(id, accuracy).unwrap(),
            enabled: !disabled.contains(&id),
        }
    })))
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    }
}

/// In-memory archive driven through the same paging loop as the real
/// providers.
pub struct MemoryHistory {
    provider_type: ProviderType,
    data: HashMap<SeriesKey, Vec<Candle>>,
    chunk_size: usize,
    retry: RetryPolicy,
    failing_pairs: HashMap<String, MigratorError>,
    transient_failures: AtomicUsize,
    cancel_after_pages: Option<(usize, CancellationToken)>,
    fetch_delay: Option<Duration>,
    pages_served: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requests: Mutex<Vec<HistoryRequest>>,
}

impl MemoryHistory {
    pub fn new(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            data: HashMap::new(),
            chunk_size: 10,
            retry: fast_retry(),
            failing_pairs: HashMap::new(),
            transient_failures: AtomicUsize::new(0),
            cancel_after_pages: None,
            fetch_delay: None,
            pages_served: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_series(mut self, series: SeriesKey, candles: Vec<Candle>) -> Self {
        self.data.insert(series, candles);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Every page read for `pair` fails with `err`.
    pub fn failing_pair(mut self, pair: &str, err: MigratorError) -> Self {
        self.failing_pairs.insert(pair.to_string(), err);
        self
    }

    /// The next `count` page reads fail with a transient database error.
    pub fn with_transient_failures(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Cancel `token` once `pages` pages have been served.
    pub fn cancel_after(mut self, pages: usize, token: CancellationToken) -> Self {
        self.cancel_after_pages = Some((pages, token));
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn pages_served(&self) -> usize {
        self.pages_served.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HistoryRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageSource for MemoryHistory {
    type Cursor = ();

    fn source_name(&self) -> &'static str {
        "memory"
    }

    async fn fetch_page(
        &self,
        request: &HistoryRequest,
        after: LowerBound,
        _cursor: (),
        limit: usize,
    ) -> Result<Page<()>, MigratorError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = self.failing_pairs.get(request.asset_pair.id()) {
            return Err(err.clone());
        }
        let pending = self.transient_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.transient_failures.store(pending - 1, Ordering::SeqCst);
            return Err(MigratorError::Database {
                reason: "connection reset".into(),
            });
        }

        let candles: Vec<Candle> = self
            .data
            .get(&request.series())
            .map(|all| {
                all.iter()
                    .filter(|c| after.admits(c.timestamp) && c.timestamp < request.end)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let served = self.pages_served.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((pages, token)) = &self.cancel_after_pages {
            if served >= *pages {
                token.cancel();
            }
        }
        Ok(Page { candles, cursor: () })
    }
}

#[async_trait]
impl HistoryProvider for MemoryHistory {
    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    async fn get_start_date(
        &self,
        asset_pair: &AssetPair,
        price_type: PriceType,
        interval: TimeInterval,
    ) -> Result<Option<DateTime<Utc>>, MigratorError> {
        if let Some(err) = self.failing_pairs.get(asset_pair.id()) {
            return Err(err.clone());
        }
        let key = SeriesKey::new(asset_pair.id(), price_type, interval);
        Ok(self
            .data
            .get(&key)
            .and_then(|c| c.iter().map(|c| c.timestamp).min()))
    }

    async fn get_history_by_chunks(
        &self,
        request: &HistoryRequest,
        on_chunk: &mut dyn ChunkHandler,
        cancel: &CancellationToken,
    ) -> Result<ChunkStats, MigratorError> {
        self.requests.lock().unwrap().push(request.clone());
        drive_chunks(self, request, self.chunk_size, &self.retry, on_chunk, cancel).await
    }
}

pub fn registry_with(provider: Arc<MemoryHistory>) -> HistoryProviderRegistry {
    HistoryProviderRegistry::new().with_provider(provider)
}

/// Candle store keyed by series, then timestamp. Re-ingesting a timestamp
/// replaces the stored candle.
#[derive(Default)]
pub struct MemorySink {
    series: Mutex<BTreeMap<SeriesKey, BTreeMap<DateTime<Utc>, Candle>>>,
    failing_pairs: Mutex<HashSet<String>>,
    ingest_calls: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_pair(&self, pair: &str) {
        self.failing_pairs.lock().unwrap().insert(pair.to_string());
    }

    pub fn seed(&self, series: &SeriesKey, candles: &[Candle]) {
        let mut all = self.series.lock().unwrap();
        let stored = all.entry(series.clone()).or_default();
        for c in candles {
            stored.insert(c.timestamp, c.clone());
        }
    }

    pub fn candles(&self, series: &SeriesKey) -> Vec<Candle> {
        self.series
            .lock()
            .unwrap()
            .get(series)
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn ingest_calls(&self) -> usize {
        self.ingest_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CandleSink for MemorySink {
    async fn ingest(&self, series: &SeriesKey, candles: &[Candle]) -> Result<u64, MigratorError> {
        self.ingest_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_pairs.lock().unwrap().contains(&series.asset_pair) {
            return Err(MigratorError::Sink {
                reason: format!("sink rejected {series}"),
            });
        }
        self.seed(series, candles);
        Ok(candles.len() as u64)
    }

    async fn last_ingested(&self, series: &SeriesKey) -> Result<Option<DateTime<Utc>>, MigratorError> {
        Ok(self
            .series
            .lock()
            .unwrap()
            .get(series)
            .and_then(|s| s.keys().next_back().copied()))
    }

    async fn list_series(&self) -> Result<Vec<SeriesKey>, MigratorError> {
        Ok(self.series.lock().unwrap().keys().cloned().collect())
    }

    async fn purge_before(&self, series: &SeriesKey, cutoff: DateTime<Utc>) -> Result<u64, MigratorError> {
        let mut all = self.series.lock().unwrap();
        let Some(stored) = all.get_mut(series) else {
            return Ok(0);
        };
        let kept = stored.split_off(&cutoff);
        let removed = stored.len() as u64;
        *stored = kept;
        Ok(removed)
    }
}

/// Snapshot backend in a map. Writes can be made to fail after a number of
/// successful ones.
#[derive(Default)]
pub struct MemorySnapshots {
    entries: Mutex<HashMap<String, String>>,
    writes: AtomicUsize,
    fail_after: Mutex<Option<usize>>,
}

impl MemorySnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `writes` more writes, then fail every later one.
    pub fn fail_after(&self, writes: usize) {
        let done = self.writes.load(Ordering::SeqCst);
        *self.fail_after.lock().unwrap() = Some(done + writes);
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn put_raw(&self, key: &str, payload: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), payload.to_string());
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotBackend for MemorySnapshots {
    async fn write(&self, key: &str, payload: &str) -> Result<(), MigratorError> {
        let limit = *self.fail_after.lock().unwrap();
        if let Some(limit) = limit {
            if self.writes.load(Ordering::SeqCst) >= limit {
                return Err(MigratorError::Io {
                    reason: "snapshot volume full".into(),
                });
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.put_raw(key, payload);
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<String>, MigratorError> {
        Ok(self.raw(key))
    }
}

pub fn hours(n: i64) -> TimeDelta {
    TimeDelta::hours(n)
}
