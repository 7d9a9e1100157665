//! Durable key/value medium behind [`SnapshotStore`](crate::domain::snapshot::SnapshotStore).

use crate::domain::error::MigratorError;
use async_trait::async_trait;

/// Implementations must replace the value for `key` atomically: a reader
/// sees either the previous payload or the new one, never a torn write.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    async fn write(&self, key: &str, payload: &str) -> Result<(), MigratorError>;
    async fn read(&self, key: &str) -> Result<Option<String>, MigratorError>;
}
