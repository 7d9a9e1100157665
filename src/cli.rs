//! CLI definition and dispatch.

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::config_assets::ConfigAssetMetadata;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::stdin_events;
use crate::adapters::{candle_store_from_config, registry_from_config, snapshot_backend_from_config};
use crate::domain::candle::{PriceType, SeriesKey, TimeInterval};
use crate::domain::cleanup::{CleanupCoordinator, CleanupOutcome, EodEvent};
use crate::domain::error::MigratorError;
use crate::domain::migration::{ItemOutcome, MigrationReport, MigrationRequest, SeriesOutcome};
use crate::domain::migration_engine::MigrationEngine;
use crate::domain::registry::ProviderType;
use crate::domain::retention::RetentionCleanup;
use crate::domain::settings::{MigrationSettings, RetentionPolicy};
use crate::logging::{LogConfig, init_logging};

/// Conventional exit status for an interrupted run.
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "candle-migrator", about = "Historical candle migration and cleanup")]
pub struct Cli {
    /// Override the configured log filter
    #[arg(long, global = true)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Migrate a date range of history into the candle store
    Migrate {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        provider: ProviderType,
        /// Comma-separated asset pair ids
        #[arg(long, value_delimiter = ',', required = true)]
        pairs: Vec<String>,
        #[arg(long = "price-type", value_delimiter = ',', default_value = "mid")]
        price_types: Vec<PriceType>,
        #[arg(long = "interval", value_delimiter = ',', default_value = "hour")]
        intervals: Vec<TimeInterval>,
        /// Inclusive start (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_moment)]
        from: DateTime<Utc>,
        /// Exclusive end (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_moment)]
        to: DateTime<Utc>,
    },
    /// Print the earliest timestamp a provider holds for a series
    StartDate {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        provider: ProviderType,
        #[arg(long)]
        pair: String,
        #[arg(long = "price-type", default_value = "mid")]
        price_type: PriceType,
        #[arg(long, default_value = "hour")]
        interval: TimeInterval,
    },
    /// Print the stored migration checkpoint of a series
    Checkpoint {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        pair: String,
        #[arg(long = "price-type", default_value = "mid")]
        price_type: PriceType,
        #[arg(long, default_value = "hour")]
        interval: TimeInterval,
    },
    /// Run one cleanup pass now
    Cleanup {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Consume end-of-day events (one JSON object per line) from stdin
    Listen {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List the history providers the config registers
    ListProviders {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn parse_moment(s: &str) -> Result<DateTime<Utc>, String> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("invalid moment '{s}', expected RFC 3339 or YYYY-MM-DD"))
}

impl Command {
    fn config_path(&self) -> &Path {
        match self {
            Command::Migrate { config, .. }
            | Command::StartDate { config, .. }
            | Command::Checkpoint { config, .. }
            | Command::Cleanup { config }
            | Command::Listen { config }
            | Command::ListProviders { config } => config,
        }
    }
}

pub fn run(cli: Cli) -> ExitCode {
    let config = match load_config(cli.command.config_path()) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let mut log_config = LogConfig::from_config(&config);
    if let Some(level) = cli.log_level {
        log_config = log_config.with_level(level);
    }
    if let Err(e) = init_logging(log_config) {
        eprintln!("warning: {e}");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            let err = MigratorError::from(e);
            eprintln!("error: {err}");
            return (&err).into();
        }
    };

    runtime.block_on(async move {
        let cancel = CancellationToken::new();
        spawn_ctrl_c(cancel.clone());
        match dispatch(cli.command, &config, cancel).await {
            Ok(code) => code,
            Err(e) => {
                eprintln!("error: {e}");
                (&e).into()
            }
        }
    })
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|err| {
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight chunks");
            cancel.cancel();
        }
    });
}

async fn dispatch(
    command: Command,
    config: &FileConfigAdapter,
    cancel: CancellationToken,
) -> Result<ExitCode, MigratorError> {
    match command {
        Command::Migrate {
            provider,
            pairs,
            price_types,
            intervals,
            from,
            to,
            ..
        } => {
            let engine = build_engine(config).await?;
            let request = MigrationRequest {
                provider,
                asset_pairs: pairs,
                price_types,
                intervals,
                from,
                to,
            };
            let report = engine.migrate(&request, &cancel).await?;
            print_report(&report);
            Ok(report_exit_code(&report))
        }
        Command::StartDate {
            provider,
            pair,
            price_type,
            interval,
            ..
        } => {
            let engine = build_engine(config).await?;
            match engine.start_date(provider, &pair, price_type, interval).await? {
                Some(ts) => println!("{}", ts.to_rfc3339()),
                None => println!("none"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Checkpoint {
            pair,
            price_type,
            interval,
            ..
        } => {
            let engine = build_engine(config).await?;
            let series = SeriesKey::new(pair, price_type, interval);
            match engine.checkpoint(&series).await? {
                Some(cp) => println!("{}", serde_json::to_string_pretty(&cp)?),
                None => eprintln!("no checkpoint for {series}"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Cleanup { .. } => {
            let coordinator = build_coordinator(config).await?;
            let event = EodEvent::new(format!("manual-{}", Utc::now().format("%Y%m%dT%H%M%SZ")));
            match coordinator.handle_eod(&event, &cancel).await {
                CleanupOutcome::Completed(summary) => {
                    println!(
                        "cleanup {}: {} series purged, {} rows removed{}",
                        summary.event_id,
                        summary.series_purged,
                        summary.rows_purged,
                        if summary.cancelled { " (cancelled)" } else { "" }
                    );
                    Ok(if summary.cancelled {
                        ExitCode::from(EXIT_CANCELLED)
                    } else {
                        ExitCode::SUCCESS
                    })
                }
                CleanupOutcome::Skipped => {
                    println!("cleanup skipped");
                    Ok(ExitCode::SUCCESS)
                }
                CleanupOutcome::Failed(err) => Err(err),
            }
        }
        Command::Listen { .. } => {
            let coordinator = Arc::new(build_coordinator(config).await?);
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let summary = stdin_events::listen(stdin, coordinator, cancel).await?;
            println!(
                "events: {} received, {} completed, {} skipped, {} failed, {} malformed",
                summary.received, summary.completed, summary.skipped, summary.failed, summary.malformed
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::ListProviders { .. } => {
            let settings = MigrationSettings::from_config(config)?;
            let registry = registry_from_config(config, &settings)?;
            if registry.is_empty() {
                eprintln!("no history providers configured");
            }
            for provider in registry.registered() {
                println!("{provider}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

pub async fn build_engine(config: &FileConfigAdapter) -> Result<MigrationEngine, MigratorError> {
    let settings = MigrationSettings::from_config(config)?;
    let registry = registry_from_config(config, &settings)?;
    let metadata = Arc::new(ConfigAssetMetadata::from_config(config)?);
    let sink = candle_store_from_config(config).await?;
    let snapshots = snapshot_backend_from_config(config).await?;
    info!(
        providers = ?registry.registered(),
        assets = metadata.len(),
        max_concurrency = settings.max_concurrency,
        chunk_size = settings.chunk_size,
        "migration engine ready"
    );
    Ok(MigrationEngine::new(registry, metadata, sink, snapshots).with_max_concurrency(settings.max_concurrency))
}

pub async fn build_coordinator(config: &FileConfigAdapter) -> Result<CleanupCoordinator, MigratorError> {
    let policy = RetentionPolicy::from_config(config)?;
    if policy.is_empty() {
        warn!("no retention configured in [cleanup], passes will keep every candle");
    }
    let sink = candle_store_from_config(config).await?;
    let snapshots = snapshot_backend_from_config(config).await?;
    let task = RetentionCleanup::new(sink, snapshots, policy);
    Ok(CleanupCoordinator::new(Arc::new(task)))
}

fn print_report(report: &MigrationReport) {
    for (pair, item) in &report.items {
        println!("{pair}\t{}\t{} candles", item.outcome, item.candles());
        for series in &item.series {
            let last = series
                .last_timestamp
                .map(|ts| ts.to_rfc3339())
                .unwrap_or_else(|| "-".to_string());
            let outcome = match &series.outcome {
                SeriesOutcome::Succeeded => "succeeded".to_string(),
                SeriesOutcome::Cancelled => "cancelled".to_string(),
                SeriesOutcome::Failed(err) => format!("failed: {err}"),
            };
            println!("  {}\t{outcome}\t{}\tlast={last}", series.series, series.candles);
        }
    }
    eprintln!(
        "{} item(s), {} failed, {} candles",
        report.items.len(),
        report.failed(),
        report.total_candles()
    );
}

/// The first failed series decides the exit code; cancellation without
/// failures exits with 130.
pub fn report_exit_code(report: &MigrationReport) -> ExitCode {
    let first_failure = report
        .items
        .values()
        .flat_map(|item| item.series.iter())
        .find_map(|s| match &s.outcome {
            SeriesOutcome::Failed(err) => Some(err),
            _ => None,
        });
    if let Some(err) = first_failure {
        return err.into();
    }
    if report
        .items
        .values()
        .any(|i| i.outcome == ItemOutcome::Cancelled)
    {
        return ExitCode::from(EXIT_CANCELLED);
    }
    ExitCode::SUCCESS
}
