//! Migration engine tests against in-memory collaborators.
//!
//! Covers the full ingest path, resume from checkpoints and from the sink,
//! cancellation, retries, snapshot failures and per-item isolation.

mod common;

use approx::assert_relative_eq;
use candle_migrator::domain::candle::{PriceType, SeriesKey, TimeInterval};
use candle_migrator::domain::chunking::LowerBound;
use candle_migrator::domain::error::MigratorError;
use candle_migrator::domain::migration::{ItemOutcome, MigrationRequest, SeriesCheckpoint, SeriesOutcome};
use candle_migrator::domain::migration_engine::MigrationEngine;
use candle_migrator::domain::registry::{HistoryProviderRegistry, ProviderType};
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn btc_hour() -> SeriesKey {
    SeriesKey::new("BTCUSD", PriceType::Mid, TimeInterval::Hour)
}

fn day_request(pairs: &[&str]) -> MigrationRequest {
    MigrationRequest::single(
        ProviderType::Sqlite,
        pairs.iter().map(|p| p.to_string()).collect(),
        PriceType::Mid,
        TimeInterval::Hour,
        ts(2024, 1, 1, 0),
        ts(2024, 1, 2, 0),
    )
}

struct Harness {
    provider: Arc<MemoryHistory>,
    sink: Arc<MemorySink>,
    snapshots: Arc<MemorySnapshots>,
    engine: MigrationEngine,
}

fn harness(provider: MemoryHistory, pairs: &[(&str, i64)]) -> Harness {
    let sink = Arc::new(MemorySink::new());
    let snapshots = Arc::new(MemorySnapshots::new());
    harness_with(provider, pairs, sink, snapshots)
}

fn harness_with(
    provider: MemoryHistory,
    pairs: &[(&str, i64)],
    sink: Arc<MemorySink>,
    snapshots: Arc<MemorySnapshots>,
) -> Harness {
    let provider = Arc::new(provider);
    let engine = MigrationEngine::new(
        registry_with(Arc::clone(&provider)),
        assets(pairs),
        sink.clone(),
        snapshots.clone(),
    );
    Harness {
        provider,
        sink,
        snapshots,
        engine,
    }
}

mod ingest {
    use super::*;

    #[tokio::test]
    async fn migrates_one_day_of_hourly_candles() {
        // 30 candles in the archive, only the first 24 fall inside the day
        let provider = MemoryHistory::new(ProviderType::Sqlite)
            .with_series(btc_hour(), hourly_candles(ts(2024, 1, 1, 0), 30));
        let h = harness(provider, &[("BTCUSD", 2)]);

        let report = h
            .engine
            .migrate(&day_request(&["BTCUSD"]), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.total_candles(), 24);
        let stored = h.sink.candles(&btc_hour());
        assert_eq!(stored.len(), 24);
        assert_eq!(stored.first().unwrap().timestamp, ts(2024, 1, 1, 0));
        assert_eq!(stored.last().unwrap().timestamp, ts(2024, 1, 1, 23));
        assert!(stored.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        // chunk size 10: pages of 10, 10, 4
        assert_eq!(h.provider.pages_served(), 3);
    }

    #[tokio::test]
    async fn completed_series_is_checkpointed() {
        let provider = MemoryHistory::new(ProviderType::Sqlite)
            .with_series(btc_hour(), hourly_candles(ts(2024, 1, 1, 0), 24));
        let h = harness(provider, &[("BTCUSD", 2)]);

        h.engine
            .migrate(&day_request(&["BTCUSD"]), &CancellationToken::new())
            .await
            .unwrap();

        let cp: SeriesCheckpoint = h.engine.checkpoint(&btc_hour()).await.unwrap().unwrap();
        assert_eq!(cp.last_timestamp, Some(ts(2024, 1, 1, 23)));
        assert_eq!(cp.candles_ingested, 24);
        assert_eq!(cp.completed_through, Some(ts(2024, 1, 2, 0)));
        assert_eq!(h.snapshots.keys(), vec!["migration:BTCUSD:mid:hour"]);
    }

    #[tokio::test]
    async fn prices_rounded_to_pair_accuracy() {
        let mut candle = make_candle(ts(2024, 1, 1, 0), 42_000.0);
        candle.open = 42_000.126;
        candle.close = 42_000.123;
        candle.trading_volume = 1.23456;
        let provider = MemoryHistory::new(ProviderType::Sqlite).with_series(btc_hour(), vec![candle]);
        let h = harness(provider, &[("BTCUSD", 2)]);

        h.engine
            .migrate(&day_request(&["BTCUSD"]), &CancellationToken::new())
            .await
            .unwrap();

        let stored = &h.sink.candles(&btc_hour())[0];
        assert_relative_eq!(stored.open, 42_000.13);
        assert_relative_eq!(stored.close, 42_000.12);
        assert_relative_eq!(stored.trading_volume, 1.23456);
    }

    #[tokio::test]
    async fn empty_range_migrates_one_interval() {
        let provider = MemoryHistory::new(ProviderType::Sqlite)
            .with_series(btc_hour(), hourly_candles(ts(2024, 1, 1, 0), 24));
        let h = harness(provider, &[("BTCUSD", 2)]);
        let at = ts(2024, 1, 1, 10);
        let request = MigrationRequest::single(
            ProviderType::Sqlite,
            vec!["BTCUSD".into()],
            PriceType::Mid,
            TimeInterval::Hour,
            at,
            at,
        );

        let report = h.engine.migrate(&request, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.total_candles(), 1);
        assert_eq!(h.sink.candles(&btc_hour())[0].timestamp, at);
    }

    #[tokio::test]
    async fn source_without_data_succeeds_with_nothing_ingested() {
        let h = harness(MemoryHistory::new(ProviderType::Sqlite), &[("BTCUSD", 2)]);

        let report = h
            .engine
            .migrate(&day_request(&["BTCUSD"]), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.total_candles(), 0);
        assert!(h.provider.requests().is_empty());
        assert_eq!(h.sink.ingest_calls(), 0);

        let cp = h.engine.checkpoint(&btc_hour()).await.unwrap().unwrap();
        assert_eq!(cp.last_timestamp, None);
        assert_eq!(cp.candles_ingested, 0);
        assert_eq!(cp.completed_through, Some(ts(2024, 1, 2, 0)));
    }

    #[tokio::test]
    async fn start_date_after_from_narrows_the_range() {
        let provider = MemoryHistory::new(ProviderType::Sqlite)
            .with_series(btc_hour(), hourly_candles(ts(2024, 1, 1, 6), 4));
        let h = harness(provider, &[("BTCUSD", 2)]);

        h.engine
            .migrate(&day_request(&["BTCUSD"]), &CancellationToken::new())
            .await
            .unwrap();

        let requests = h.provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].lower, LowerBound::Inclusive(ts(2024, 1, 1, 6)));
        assert_eq!(requests[0].end, ts(2024, 1, 2, 0));
    }

    #[tokio::test]
    async fn every_requested_series_is_migrated() {
        let bid_min5 = SeriesKey::new("BTCUSD", PriceType::Bid, TimeInterval::Min5);
        let ask_hour = SeriesKey::new("BTCUSD", PriceType::Ask, TimeInterval::Hour);
        let provider = MemoryHistory::new(ProviderType::Sqlite)
            .with_series(bid_min5.clone(), series_candles(ts(2024, 1, 1, 0), TimeInterval::Min5, 12))
            .with_series(ask_hour.clone(), hourly_candles(ts(2024, 1, 1, 0), 3));
        let h = harness(provider, &[("BTCUSD", 2)]);
        let request = MigrationRequest {
            provider: ProviderType::Sqlite,
            asset_pairs: vec!["BTCUSD".into()],
            price_types: vec![PriceType::Bid, PriceType::Ask],
            intervals: vec![TimeInterval::Min5, TimeInterval::Hour],
            from: ts(2024, 1, 1, 0),
            to: ts(2024, 1, 2, 0),
        };

        let report = h.engine.migrate(&request, &CancellationToken::new()).await.unwrap();

        let item = &report.items["BTCUSD"];
        assert_eq!(item.series.len(), 4);
        assert_eq!(item.outcome, ItemOutcome::Succeeded);
        assert_eq!(h.sink.candles(&bid_min5).len(), 12);
        assert_eq!(h.sink.candles(&ask_hour).len(), 3);
        assert_eq!(report.total_candles(), 15);
    }
}

mod resume {
    use super::*;

    #[tokio::test]
    async fn cancelled_run_resumes_behind_checkpoint() {
        let cancel = CancellationToken::new();
        let first = MemoryHistory::new(ProviderType::Sqlite)
            .with_series(btc_hour(), hourly_candles(ts(2024, 1, 1, 0), 24))
            .cancel_after(1, cancel.clone());
        let h = harness(first, &[("BTCUSD", 2)]);

        let report = h.engine.migrate(&day_request(&["BTCUSD"]), &cancel).await.unwrap();
        assert_eq!(report.items["BTCUSD"].outcome, ItemOutcome::Cancelled);
        assert_eq!(h.sink.candles(&btc_hour()).len(), 10);
        let cp = h.engine.checkpoint(&btc_hour()).await.unwrap().unwrap();
        assert_eq!(cp.last_timestamp, Some(ts(2024, 1, 1, 9)));
        assert_eq!(cp.completed_through, None);

        let second = MemoryHistory::new(ProviderType::Sqlite)
            .with_series(btc_hour(), hourly_candles(ts(2024, 1, 1, 0), 24));
        let h2 = harness_with(second, &[("BTCUSD", 2)], h.sink.clone(), h.snapshots.clone());
        let report = h2
            .engine
            .migrate(&day_request(&["BTCUSD"]), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.total_candles(), 14);
        assert_eq!(h2.provider.requests()[0].lower, LowerBound::Exclusive(ts(2024, 1, 1, 9)));
        assert_eq!(h.sink.candles(&btc_hour()).len(), 24);
        let cp = h2.engine.checkpoint(&btc_hour()).await.unwrap().unwrap();
        assert_eq!(cp.candles_ingested, 24);
    }

    #[tokio::test]
    async fn rerun_after_completion_ingests_nothing_new() {
        let provider = MemoryHistory::new(ProviderType::Sqlite)
            .with_series(btc_hour(), hourly_candles(ts(2024, 1, 1, 0), 24));
        let h = harness(provider, &[("BTCUSD", 2)]);
        let request = day_request(&["BTCUSD"]);

        h.engine.migrate(&request, &CancellationToken::new()).await.unwrap();
        let calls = h.sink.ingest_calls();
        let report = h.engine.migrate(&request, &CancellationToken::new()).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.total_candles(), 0);
        assert_eq!(h.sink.ingest_calls(), calls);
        assert_eq!(h.sink.candles(&btc_hour()).len(), 24);
    }

    #[tokio::test]
    async fn sink_boundary_used_without_checkpoint() {
        let candles = hourly_candles(ts(2024, 1, 1, 0), 24);
        let provider = MemoryHistory::new(ProviderType::Sqlite).with_series(btc_hour(), candles.clone());
        let h = harness(provider, &[("BTCUSD", 2)]);
        h.sink.seed(&btc_hour(), &candles[..5]);

        let report = h
            .engine
            .migrate(&day_request(&["BTCUSD"]), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(h.provider.requests()[0].lower, LowerBound::Exclusive(ts(2024, 1, 1, 4)));
        assert_eq!(report.total_candles(), 19);
        assert_eq!(h.sink.candles(&btc_hour()).len(), 24);
    }

    #[tokio::test]
    async fn boundary_before_range_starts_at_from() {
        let candles = hourly_candles(ts(2023, 12, 31, 0), 48);
        let provider = MemoryHistory::new(ProviderType::Sqlite).with_series(btc_hour(), candles.clone());
        let h = harness(provider, &[("BTCUSD", 2)]);
        h.sink.seed(&btc_hour(), &candles[..3]);

        let report = h
            .engine
            .migrate(&day_request(&["BTCUSD"]), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(h.provider.requests()[0].lower, LowerBound::Inclusive(ts(2024, 1, 1, 0)));
        assert_eq!(report.total_candles(), 24);
    }

    #[tokio::test]
    async fn later_candle_in_sink_does_not_skip_older_range() {
        let provider = MemoryHistory::new(ProviderType::Sqlite)
            .with_series(btc_hour(), hourly_candles(ts(2024, 1, 1, 0), 24));
        let h = harness(provider, &[("BTCUSD", 2)]);
        h.sink.seed(&btc_hour(), &[make_candle(ts(2024, 1, 10, 0), 500.0)]);

        let report = h
            .engine
            .migrate(&day_request(&["BTCUSD"]), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.total_candles(), 24);
        assert_eq!(h.provider.requests()[0].lower, LowerBound::Inclusive(ts(2024, 1, 1, 0)));
        assert_eq!(h.sink.candles(&btc_hour()).len(), 25);
    }

    #[tokio::test]
    async fn checkpoint_past_range_end_backfills_older_range() {
        let provider = MemoryHistory::new(ProviderType::Sqlite)
            .with_series(btc_hour(), hourly_candles(ts(2024, 1, 1, 0), 6 * 24));
        let h = harness(provider, &[("BTCUSD", 2)]);
        let later = MigrationRequest::single(
            ProviderType::Sqlite,
            vec!["BTCUSD".into()],
            PriceType::Mid,
            TimeInterval::Hour,
            ts(2024, 1, 5, 0),
            ts(2024, 1, 6, 0),
        );
        h.engine.migrate(&later, &CancellationToken::new()).await.unwrap();

        let report = h
            .engine
            .migrate(&day_request(&["BTCUSD"]), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.total_candles(), 24);
        assert_eq!(h.provider.requests()[1].lower, LowerBound::Inclusive(ts(2024, 1, 1, 0)));
        assert_eq!(h.sink.candles(&btc_hour()).len(), 48);
        let cp = h.engine.checkpoint(&btc_hour()).await.unwrap().unwrap();
        assert_eq!(cp.completed_through, Some(ts(2024, 1, 6, 0)));
        assert_eq!(cp.covered_from, Some(ts(2024, 1, 1, 0)));
        assert_eq!(cp.last_timestamp, Some(ts(2024, 1, 1, 23)));
    }

    #[tokio::test]
    async fn checkpoint_starting_after_from_is_not_trusted() {
        let provider = MemoryHistory::new(ProviderType::Sqlite)
            .with_series(btc_hour(), hourly_candles(ts(2024, 1, 1, 0), 24));
        let h = harness(provider, &[("BTCUSD", 2)]);
        let afternoon = MigrationRequest::single(
            ProviderType::Sqlite,
            vec!["BTCUSD".into()],
            PriceType::Mid,
            TimeInterval::Hour,
            ts(2024, 1, 1, 12),
            ts(2024, 1, 2, 0),
        );
        h.engine.migrate(&afternoon, &CancellationToken::new()).await.unwrap();
        assert_eq!(h.sink.candles(&btc_hour()).len(), 12);

        let report = h
            .engine
            .migrate(&day_request(&["BTCUSD"]), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(h.provider.requests()[1].lower, LowerBound::Inclusive(ts(2024, 1, 1, 0)));
        assert_eq!(report.total_candles(), 24);
        assert_eq!(h.sink.candles(&btc_hour()).len(), 24);
    }

    #[tokio::test]
    async fn corrupt_checkpoint_fails_series() {
        let provider = MemoryHistory::new(ProviderType::Sqlite)
            .with_series(btc_hour(), hourly_candles(ts(2024, 1, 1, 0), 24));
        let h = harness(provider, &[("BTCUSD", 2)]);
        h.snapshots.put_raw("migration:BTCUSD:mid:hour", "{not json");

        let report = h
            .engine
            .migrate(&day_request(&["BTCUSD"]), &CancellationToken::new())
            .await
            .unwrap();

        let series = &report.items["BTCUSD"].series[0];
        assert!(matches!(series.outcome, SeriesOutcome::Failed(MigratorError::Serialization { .. })));
        assert_eq!(h.sink.ingest_calls(), 0);
    }
}

mod cancellation {
    use super::*;

    #[tokio::test]
    async fn cancelled_before_start_touches_nothing() {
        let provider = MemoryHistory::new(ProviderType::Sqlite)
            .with_series(btc_hour(), hourly_candles(ts(2024, 1, 1, 0), 24));
        let h = harness(provider, &[("BTCUSD", 2), ("ETHUSD", 2)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = h
            .engine
            .migrate(&day_request(&["BTCUSD", "ETHUSD"]), &cancel)
            .await
            .unwrap();

        assert!(report.items.values().all(|i| i.outcome == ItemOutcome::Cancelled));
        assert_eq!(report.total_candles(), 0);
        assert_eq!(h.provider.pages_served(), 0);
        assert_eq!(h.snapshots.writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_retrying() {
        let cancel = CancellationToken::new();
        let provider = MemoryHistory::new(ProviderType::Sqlite)
            .with_series(btc_hour(), hourly_candles(ts(2024, 1, 1, 0), 24))
            .with_retry(candle_migrator::domain::chunking::RetryPolicy {
                max_attempts: 10,
                initial_backoff: Duration::from_secs(60),
                max_backoff: Duration::from_secs(60),
            })
            .with_transient_failures(10);
        let h = harness(provider, &[("BTCUSD", 2)]);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            trigger.cancel();
        });
        let report = h.engine.migrate(&day_request(&["BTCUSD"]), &cancel).await.unwrap();

        assert_eq!(report.items["BTCUSD"].outcome, ItemOutcome::Cancelled);
        assert_eq!(report.total_candles(), 0);
    }
}

mod failures {
    use super::*;

    #[tokio::test]
    async fn unknown_pair_rejects_request() {
        let h = harness(MemoryHistory::new(ProviderType::Sqlite), &[("BTCUSD", 2)]);

        let err = h
            .engine
            .migrate(&day_request(&["BTCUSD", "DOGEUSD"]), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, MigratorError::UnknownAssetPair { ref id, .. } if id == "DOGEUSD"));
        assert_eq!(h.provider.pages_served(), 0);
    }

    #[tokio::test]
    async fn disabled_pair_rejects_request() {
        let provider = Arc::new(MemoryHistory::new(ProviderType::Sqlite));
        let engine = MigrationEngine::new(
            registry_with(provider),
            assets_with_disabled(&[("BTCUSD", 2), ("ETHUSD", 2)], &["ETHUSD"]),
            Arc::new(MemorySink::new()),
            Arc::new(MemorySnapshots::new()),
        );

        let err = engine
            .migrate(&day_request(&["ETHUSD"]), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            MigratorError::UnknownAssetPair { id, reason } => {
                assert_eq!(id, "ETHUSD");
                assert!(reason.contains("disabled"));
            }
            other => panic!("expected UnknownAssetPair, got {other}"),
        }
    }

    #[tokio::test]
    async fn inverted_range_rejects_request() {
        let h = harness(MemoryHistory::new(ProviderType::Sqlite), &[("BTCUSD", 2)]);
        let mut request = day_request(&["BTCUSD"]);
        std::mem::swap(&mut request.from, &mut request.to);

        let err = h.engine.migrate(&request, &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, MigratorError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn unregistered_provider_fails_every_item() {
        let engine = MigrationEngine::new(
            HistoryProviderRegistry::new(),
            assets(&[("BTCUSD", 2), ("ETHUSD", 2)]),
            Arc::new(MemorySink::new()),
            Arc::new(MemorySnapshots::new()),
        );

        let report = engine
            .migrate(&day_request(&["BTCUSD", "ETHUSD"]), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.failed(), 2);
        for item in report.items.values() {
            assert!(matches!(
                item.series[0].outcome,
                SeriesOutcome::Failed(MigratorError::ProviderNotRegistered { .. })
            ));
        }
    }

    #[tokio::test]
    async fn failing_pair_does_not_affect_siblings() {
        let eth = SeriesKey::new("ETHUSD", PriceType::Mid, TimeInterval::Hour);
        let provider = MemoryHistory::new(ProviderType::Sqlite)
            .with_series(btc_hour(), hourly_candles(ts(2024, 1, 1, 0), 24))
            .with_series(eth.clone(), hourly_candles(ts(2024, 1, 1, 0), 24))
            .failing_pair(
                "BTCUSD",
                MigratorError::DatabaseQuery {
                    reason: "no such table".into(),
                },
            );
        let h = harness(provider, &[("BTCUSD", 2), ("ETHUSD", 2)]);

        let report = h
            .engine
            .migrate(&day_request(&["BTCUSD", "ETHUSD"]), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(report.items["BTCUSD"].outcome, ItemOutcome::Failed(_)));
        assert_eq!(report.items["ETHUSD"].outcome, ItemOutcome::Succeeded);
        assert_eq!(h.sink.candles(&eth).len(), 24);
        assert!(h.sink.candles(&btc_hour()).is_empty());
        assert_eq!(report.failed(), 1);
    }

    #[tokio::test]
    async fn sink_failure_is_reported_per_item() {
        let eth = SeriesKey::new("ETHUSD", PriceType::Mid, TimeInterval::Hour);
        let provider = MemoryHistory::new(ProviderType::Sqlite)
            .with_series(btc_hour(), hourly_candles(ts(2024, 1, 1, 0), 24))
            .with_series(eth.clone(), hourly_candles(ts(2024, 1, 1, 0), 24));
        let h = harness(provider, &[("BTCUSD", 2), ("ETHUSD", 2)]);
        h.sink.fail_pair("ETHUSD");

        let report = h
            .engine
            .migrate(&day_request(&["BTCUSD", "ETHUSD"]), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(
            report.items["ETHUSD"].series[0].outcome,
            SeriesOutcome::Failed(MigratorError::Sink { .. })
        ));
        assert_eq!(report.items["BTCUSD"].outcome, ItemOutcome::Succeeded);
        assert!(h.engine.checkpoint(&eth).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let provider = MemoryHistory::new(ProviderType::Sqlite)
            .with_series(btc_hour(), hourly_candles(ts(2024, 1, 1, 0), 24))
            .with_transient_failures(2);
        let h = harness(provider, &[("BTCUSD", 2)]);

        let report = h
            .engine
            .migrate(&day_request(&["BTCUSD"]), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.total_candles(), 24);
    }

    #[tokio::test]
    async fn exhausted_retries_report_source_unavailable() {
        let provider = MemoryHistory::new(ProviderType::Sqlite)
            .with_series(btc_hour(), hourly_candles(ts(2024, 1, 1, 0), 24))
            .with_transient_failures(5);
        let h = harness(provider, &[("BTCUSD", 2)]);

        let report = h
            .engine
            .migrate(&day_request(&["BTCUSD"]), &CancellationToken::new())
            .await
            .unwrap();

        match &report.items["BTCUSD"].series[0].outcome {
            SeriesOutcome::Failed(MigratorError::SourceUnavailable { provider, attempts, .. }) => {
                assert_eq!(provider, "memory");
                assert_eq!(*attempts, 3);
            }
            other => panic!("expected SourceUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn snapshot_write_failure_halts_series() {
        let provider = MemoryHistory::new(ProviderType::Sqlite)
            .with_series(btc_hour(), hourly_candles(ts(2024, 1, 1, 0), 24));
        let h = harness(provider, &[("BTCUSD", 2)]);
        h.snapshots.fail_after(1);

        let report = h
            .engine
            .migrate(&day_request(&["BTCUSD"]), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(
            report.items["BTCUSD"].series[0].outcome,
            SeriesOutcome::Failed(MigratorError::SnapshotWriteFailed { .. })
        ));
        // the second chunk reached the sink before its checkpoint failed
        assert_eq!(h.sink.candles(&btc_hour()).len(), 20);
        assert_eq!(h.provider.pages_served(), 2);
        let cp = h.engine.checkpoint(&btc_hour()).await.unwrap().unwrap();
        assert_eq!(cp.last_timestamp, Some(ts(2024, 1, 1, 9)));
    }
}

mod concurrency {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn items_bounded_by_max_concurrency() {
        let pairs = ["P1", "P2", "P3", "P4", "P5", "P6"];
        let mut provider =
            MemoryHistory::new(ProviderType::Sqlite).with_fetch_delay(Duration::from_millis(50));
        for pair in pairs {
            provider = provider.with_series(
                SeriesKey::new(pair, PriceType::Mid, TimeInterval::Hour),
                hourly_candles(ts(2024, 1, 1, 0), 5),
            );
        }
        let specs: Vec<(&str, i64)> = pairs.iter().map(|p| (*p, 2)).collect();
        let provider = Arc::new(provider);
        let sink = Arc::new(MemorySink::new());
        let engine = MigrationEngine::new(
            registry_with(Arc::clone(&provider)),
            assets(&specs),
            sink.clone(),
            Arc::new(MemorySnapshots::new()),
        )
        .with_max_concurrency(2);

        let report = engine
            .migrate(&day_request(&pairs), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.total_candles(), 30);
        assert_eq!(provider.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn duplicate_pairs_migrated_once() {
        let provider = MemoryHistory::new(ProviderType::Sqlite)
            .with_series(btc_hour(), hourly_candles(ts(2024, 1, 1, 0), 24));
        let h = harness(provider, &[("BTCUSD", 2)]);

        let report = h
            .engine
            .migrate(&day_request(&["BTCUSD", "BTCUSD"]), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.items.len(), 1);
        assert_eq!(report.total_candles(), 24);
        assert_eq!(h.provider.requests().len(), 1);
    }
}

mod start_date {
    use super::*;

    #[tokio::test]
    async fn start_date_reports_earliest_candle() {
        let provider = MemoryHistory::new(ProviderType::Sqlite)
            .with_series(btc_hour(), hourly_candles(ts(2023, 6, 1, 5), 3));
        let h = harness(provider, &[("BTCUSD", 2)]);

        let start = h
            .engine
            .start_date(ProviderType::Sqlite, "BTCUSD", PriceType::Mid, TimeInterval::Hour)
            .await
            .unwrap();
        assert_eq!(start, Some(ts(2023, 6, 1, 5)));

        let none = h
            .engine
            .start_date(ProviderType::Sqlite, "BTCUSD", PriceType::Bid, TimeInterval::Hour)
            .await
            .unwrap();
        assert_eq!(none, None);
    }

    #[tokio::test]
    async fn start_date_needs_registered_provider() {
        let h = harness(MemoryHistory::new(ProviderType::Sqlite), &[("BTCUSD", 2)]);

        let err = h
            .engine
            .start_date(ProviderType::Csv, "BTCUSD", PriceType::Mid, TimeInterval::Hour)
            .await
            .unwrap_err();

        assert!(matches!(err, MigratorError::ProviderNotRegistered { .. }));
    }
}
