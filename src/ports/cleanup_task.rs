//! The work performed by one cleanup pass.

use crate::domain::cleanup::{CleanupSummary, EodEvent};
use crate::domain::error::MigratorError;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait CleanupTask: Send + Sync {
    async fn run(
        &self,
        event: &EodEvent,
        cancel: &CancellationToken,
    ) -> Result<CleanupSummary, MigratorError>;
}
