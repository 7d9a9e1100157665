//! Migration request, checkpoint and report types.

use crate::domain::asset_pair::AssetPair;
use crate::domain::candle::{PriceType, SeriesKey, TimeInterval};
use crate::domain::error::MigratorError;
use crate::domain::registry::ProviderType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Snapshot namespace for per-series migration progress.
pub const MIGRATION_NAMESPACE: &str = "migration";

/// An operator request to copy a date range of history into the store.
///
/// `from` is inclusive and `to` exclusive. `from == to` selects the single
/// candle at `from`.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationRequest {
    pub provider: ProviderType,
    pub asset_pairs: Vec<String>,
    pub price_types: Vec<PriceType>,
    pub intervals: Vec<TimeInterval>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl MigrationRequest {
    /// The basic form: one price type and one interval for every pair.
    pub fn single(
        provider: ProviderType,
        asset_pairs: Vec<String>,
        price_type: PriceType,
        interval: TimeInterval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Self {
        Self {
            provider,
            asset_pairs,
            price_types: vec![price_type],
            intervals: vec![interval],
            from,
            to,
        }
    }

    /// Shape checks that need no collaborator.
    pub fn validate(&self) -> Result<(), MigratorError> {
        if self.asset_pairs.is_empty() {
            return Err(MigratorError::InvalidRequest {
                reason: "at least one asset pair is required".into(),
            });
        }
        if self.price_types.is_empty() || self.intervals.is_empty() {
            return Err(MigratorError::InvalidRequest {
                reason: "at least one price type and one interval are required".into(),
            });
        }
        if self.from > self.to {
            return Err(MigratorError::InvalidRequest {
                reason: format!("from {} is after to {}", self.from, self.to),
            });
        }
        Ok(())
    }

    /// Exclusive end of the range for one interval.
    pub fn end_for(&self, interval: TimeInterval) -> DateTime<Utc> {
        if self.from == self.to {
            self.from + interval.duration()
        } else {
            self.to
        }
    }

    /// Every (price type, interval) combination, without repeats, in request order.
    pub fn series_scope(&self) -> Vec<(PriceType, TimeInterval)> {
        let mut scope = Vec::new();
        for &price_type in &self.price_types {
            for &interval in &self.intervals {
                if !scope.contains(&(price_type, interval)) {
                    scope.push((price_type, interval));
                }
            }
        }
        scope
    }
}

/// One validated asset pair and the series to migrate for it.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationItem {
    pub asset_pair: AssetPair,
    pub series: Vec<(PriceType, TimeInterval)>,
}

/// Durable progress for one series.
///
/// `covered_from` and `last_timestamp` describe one contiguous stretch: every
/// source candle in `[covered_from, last_timestamp]` has been ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesCheckpoint {
    /// Inclusive start of the stretch the current run is ingesting.
    #[serde(default)]
    pub covered_from: Option<DateTime<Utc>>,
    /// Timestamp of the last candle in the last fully ingested chunk.
    pub last_timestamp: Option<DateTime<Utc>>,
    pub candles_ingested: u64,
    /// Latest exclusive end of a range processed without error. Never moves
    /// backwards.
    pub completed_through: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SeriesCheckpoint {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            covered_from: None,
            last_timestamp: None,
            candles_ingested: 0,
            completed_through: None,
            updated_at: now,
        }
    }

    /// Where a run over `[from, end)` may pick up: the last ingested candle,
    /// provided the stretch it closes starts at or before `from` and the
    /// candle itself lies inside the range.
    pub fn resume_point(&self, from: DateTime<Utc>, end: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let covered_from = self.covered_from?;
        let last = self.last_timestamp?;
        (covered_from <= from && from <= last && last < end).then_some(last)
    }

    /// Start a new stretch at `from`, discarding the old resume point.
    pub fn restart(&mut self, from: DateTime<Utc>) {
        self.covered_from = Some(from);
        self.last_timestamp = None;
    }

    /// Record a finished range ending at `end`.
    pub fn complete(&mut self, end: DateTime<Utc>, now: DateTime<Utc>) {
        self.completed_through = self.completed_through.max(Some(end));
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeriesOutcome {
    Succeeded,
    Failed(MigratorError),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesReport {
    pub series: SeriesKey,
    pub outcome: SeriesOutcome,
    /// Candles ingested by this run.
    pub candles: u64,
    pub last_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Succeeded,
    Failed(String),
    Cancelled,
}

impl fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemOutcome::Succeeded => f.write_str("succeeded"),
            ItemOutcome::Failed(reason) => write!(f, "failed({reason})"),
            ItemOutcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemReport {
    pub asset_pair: String,
    pub outcome: ItemOutcome,
    pub series: Vec<SeriesReport>,
}

impl ItemReport {
    /// Any failed series fails the item; otherwise any cancelled series
    /// cancels it.
    pub fn from_series(asset_pair: impl Into<String>, series: Vec<SeriesReport>) -> Self {
        let failures: Vec<String> = series
            .iter()
            .filter_map(|s| match &s.outcome {
                SeriesOutcome::Failed(err) => Some(format!("{}: {err}", s.series)),
                _ => None,
            })
            .collect();
        let outcome = if !failures.is_empty() {
            ItemOutcome::Failed(failures.join("; "))
        } else if series.iter().any(|s| s.outcome == SeriesOutcome::Cancelled) {
            ItemOutcome::Cancelled
        } else {
            ItemOutcome::Succeeded
        };
        Self {
            asset_pair: asset_pair.into(),
            outcome,
            series,
        }
    }

    pub fn candles(&self) -> u64 {
        self.series.iter().map(|s| s.candles).sum()
    }
}

/// Per-item outcome map for one migration run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationReport {
    pub items: BTreeMap<String, ItemReport>,
}

impl MigrationReport {
    pub fn outcome(&self, asset_pair: &str) -> Option<&ItemOutcome> {
        self.items.get(asset_pair).map(|i| &i.outcome)
    }

    pub fn failed(&self) -> usize {
        self.items
            .values()
            .filter(|i| matches!(i.outcome, ItemOutcome::Failed(_)))
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.items
            .values()
            .all(|i| i.outcome == ItemOutcome::Succeeded)
    }

    pub fn total_candles(&self) -> u64 {
        self.items.values().map(ItemReport::candles).sum()
    }
}
