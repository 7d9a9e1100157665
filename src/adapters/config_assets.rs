//! Asset pair metadata read from the `[assets]` config section.
//!
//! ```ini
//! [assets]
//! pairs = BTCUSD:2, EURUSD:5
//! disabled = EURUSD
//! ```

use crate::domain::asset_pair::AssetPair;
use crate::domain::error::MigratorError;
use crate::ports::asset_metadata::{AssetMetadata, AssetPairInfo};
use crate::ports::config_port::ConfigPort;
use async_trait::async_trait;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ConfigAssetMetadata {
    pairs: HashMap<String, AssetPairInfo>,
}

impl ConfigAssetMetadata {
    pub fn new(pairs: impl IntoIterator<Item = AssetPairInfo>) -> Self {
        Self {
            pairs: pairs
                .into_iter()
                .map(|info| (info.pair.id().to_string(), info))
                .collect(),
        }
    }

    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, MigratorError> {
        let disabled = config.get_list("assets", "disabled");
        let mut infos = Vec::new();
        for entry in config.get_list("assets", "pairs") {
            let (id, accuracy) = entry.rsplit_once(':').ok_or_else(|| MigratorError::ConfigInvalid {
                section: "assets".into(),
                key: "pairs".into(),
                reason: format!("expected ID:ACCURACY, got '{entry}'"),
            })?;
            let accuracy: i64 = accuracy.trim().parse().map_err(|_| MigratorError::ConfigInvalid {
                section: "assets".into(),
                key: "pairs".into(),
                reason: format!("accuracy for {id} is not an integer"),
            })?;
            let pair = AssetPair::new(id, accuracy).map_err(|e| MigratorError::ConfigInvalid {
                section: "assets".into(),
                key: "pairs".into(),
                reason: e.to_string(),
            })?;
            let enabled = !disabled.iter().any(|d| d == pair.id());
            infos.push(AssetPairInfo { pair, enabled });
        }
        Ok(Self::new(infos))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[async_trait]
impl AssetMetadata for ConfigAssetMetadata {
    async fn lookup(&self, id: &str) -> Result<Option<AssetPairInfo>, MigratorError> {
        Ok(self.pairs.get(id).cloned())
    }
}
