//! Asset pair metadata port.

use crate::domain::asset_pair::AssetPair;
use crate::domain::error::MigratorError;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq)]
pub struct AssetPairInfo {
    pub pair: AssetPair,
    pub enabled: bool,
}

#[async_trait]
pub trait AssetMetadata: Send + Sync {
    async fn lookup(&self, id: &str) -> Result<Option<AssetPairInfo>, MigratorError>;
}
