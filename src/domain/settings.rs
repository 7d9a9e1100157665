//! Typed settings read from configuration.
//!
//! Every value is validated when the settings are built, so a bad config
//! fails at startup instead of halfway through a migration.

use crate::domain::candle::TimeInterval;
use crate::domain::chunking::{DEFAULT_CHUNK_SIZE, RetryPolicy};
use crate::domain::error::MigratorError;
use crate::domain::migration_engine::DEFAULT_MAX_CONCURRENCY;
use crate::ports::config_port::ConfigPort;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationSettings {
    pub max_concurrency: usize,
    pub chunk_size: usize,
    pub retry: RetryPolicy,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

impl MigrationSettings {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, MigratorError> {
        let defaults = Self::default();
        let max_concurrency = positive(config, "migration", "max_concurrency", defaults.max_concurrency as i64)?;
        let chunk_size = positive(config, "migration", "chunk_size", defaults.chunk_size as i64)?;
        let attempts = positive(config, "migration", "retry_attempts", defaults.retry.max_attempts as i64)?;
        let backoff_ms = non_negative(
            config,
            "retry_backoff_ms",
            defaults.retry.initial_backoff.as_millis() as i64,
        )?;
        let max_backoff_ms = non_negative(
            config,
            "retry_max_backoff_ms",
            defaults.retry.max_backoff.as_millis() as i64,
        )?;
        if max_backoff_ms < backoff_ms {
            return Err(MigratorError::ConfigInvalid {
                section: "migration".into(),
                key: "retry_max_backoff_ms".into(),
                reason: "retry_max_backoff_ms must not be below retry_backoff_ms".into(),
            });
        }
        Ok(Self {
            max_concurrency: max_concurrency as usize,
            chunk_size: chunk_size as usize,
            retry: RetryPolicy {
                max_attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
                initial_backoff: Duration::from_millis(backoff_ms as u64),
                max_backoff: Duration::from_millis(max_backoff_ms as u64),
            },
        })
    }
}

fn read_int(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<i64>, MigratorError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| MigratorError::ConfigInvalid {
                section: section.into(),
                key: key.into(),
                reason: format!("'{raw}' is not an integer"),
            }),
    }
}

/// Connection pool size from `[section] pool_size`, default 4.
pub fn pool_size(config: &dyn ConfigPort, section: &str) -> Result<u32, MigratorError> {
    let size = positive(config, section, "pool_size", 4)?;
    u32::try_from(size).map_err(|_| MigratorError::ConfigInvalid {
        section: section.into(),
        key: "pool_size".into(),
        reason: format!("pool_size {size} is too large"),
    })
}

fn positive(config: &dyn ConfigPort, section: &str, key: &str, default: i64) -> Result<i64, MigratorError> {
    let value = read_int(config, section, key)?.unwrap_or(default);
    if value < 1 {
        return Err(MigratorError::ConfigInvalid {
            section: section.into(),
            key: key.into(),
            reason: format!("{key} must be at least 1, got {value}"),
        });
    }
    Ok(value)
}

fn non_negative(config: &dyn ConfigPort, key: &str, default: i64) -> Result<i64, MigratorError> {
    let value = read_int(config, "migration", key)?.unwrap_or(default);
    if value < 0 {
        return Err(MigratorError::ConfigInvalid {
            section: "migration".into(),
            key: key.into(),
            reason: format!("{key} must be non-negative, got {value}"),
        });
    }
    Ok(value)
}

/// How long candles of each interval are kept. Intervals without an entry
/// are kept forever.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetentionPolicy {
    days: BTreeMap<TimeInterval, i64>,
}

impl RetentionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keep(mut self, interval: TimeInterval, days: i64) -> Self {
        self.days.insert(interval, days);
        self
    }

    /// Reads `[cleanup] <interval>_days`, e.g. `minute_days = 7`.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, MigratorError> {
        let mut policy = Self::new();
        for interval in TimeInterval::ALL {
            let key = format!("{}_days", interval.as_str());
            if let Some(days) = read_int(config, "cleanup", &key)? {
                if days < 1 {
                    return Err(MigratorError::ConfigInvalid {
                        section: "cleanup".into(),
                        key,
                        reason: format!("retention must be at least 1 day, got {days}"),
                    });
                }
                policy.days.insert(interval, days);
            }
        }
        Ok(policy)
    }

    pub fn retention(&self, interval: TimeInterval) -> Option<TimeDelta> {
        self.days.get(&interval).map(|d| TimeDelta::days(*d))
    }

    /// Candles of `interval` older than this are purged.
    pub fn cutoff(&self, interval: TimeInterval, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.retention(interval).map(|r| now - r)
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}
