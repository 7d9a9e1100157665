//! Provider registry: maps a source type to its history provider.

use crate::domain::error::MigratorError;
use crate::ports::history_provider::HistoryProvider;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Kind of historical archive a provider reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProviderType {
    Sqlite,
    Postgres,
    Csv,
}

impl ProviderType {
    pub const ALL: [ProviderType; 3] = [ProviderType::Sqlite, ProviderType::Postgres, ProviderType::Csv];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Sqlite => "sqlite",
            ProviderType::Postgres => "postgres",
            ProviderType::Csv => "csv",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = MigratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderType::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MigratorError::ProviderNotRegistered {
                provider: s.trim().to_string(),
            })
    }
}

/// Immutable after construction. Registering a type twice keeps the last
/// provider.
#[derive(Default, Clone)]
pub struct HistoryProviderRegistry {
    providers: BTreeMap<ProviderType, Arc<dyn HistoryProvider>>,
}

impl HistoryProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the type the provider reports for itself.
    pub fn with_provider(mut self, provider: Arc<dyn HistoryProvider>) -> Self {
        self.providers.insert(provider.provider_type(), provider);
        self
    }

    pub fn resolve(&self, provider: ProviderType) -> Result<Arc<dyn HistoryProvider>, MigratorError> {
        self.providers
            .get(&provider)
            .cloned()
            .ok_or_else(|| MigratorError::ProviderNotRegistered {
                provider: provider.to_string(),
            })
    }

    pub fn registered(&self) -> Vec<ProviderType> {
        self.providers.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for HistoryProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryProviderRegistry")
            .field("providers", &self.registered())
            .finish()
    }
}
