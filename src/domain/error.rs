//! Domain error types.

/// Top-level error type for candle-migrator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MigratorError {
    #[error("no history provider registered for type '{provider}'")]
    ProviderNotRegistered { provider: String },

    #[error("source '{provider}' unavailable after {attempts} attempt(s): {reason}")]
    SourceUnavailable {
        provider: String,
        attempts: u32,
        reason: String,
    },

    #[error("unknown asset pair {id}: {reason}")]
    UnknownAssetPair { id: String, reason: String },

    #[error("failed to write snapshot {key}: {reason}")]
    SnapshotWriteFailed { key: String, reason: String },

    #[error("cleanup failed: {reason}")]
    CleanupFailed { reason: String },

    #[error("invalid asset pair: {reason}")]
    InvalidAssetPair { reason: String },

    #[error("invalid migration request: {reason}")]
    InvalidRequest { reason: String },

    #[error("invalid source data for {series}: {reason}")]
    SourceData { series: String, reason: String },

    #[error("candle sink error: {reason}")]
    Sink { reason: String },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("io error: {reason}")]
    Io { reason: String },
}

impl MigratorError {
    /// Whether a provider may retry the operation that produced this error.
    ///
    /// Connectivity and I/O failures are transient. Query errors, bad rows and
    /// everything raised by downstream consumers are permanent.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MigratorError::Database { .. } | MigratorError::Io { .. }
        )
    }

    /// Short machine-friendly label used in reports and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            MigratorError::ProviderNotRegistered { .. } => "provider_not_registered",
            MigratorError::SourceUnavailable { .. } => "source_unavailable",
            MigratorError::UnknownAssetPair { .. } => "unknown_asset_pair",
            MigratorError::SnapshotWriteFailed { .. } => "snapshot_write_failed",
            MigratorError::CleanupFailed { .. } => "cleanup_failed",
            MigratorError::InvalidAssetPair { .. } => "invalid_asset_pair",
            MigratorError::InvalidRequest { .. } => "invalid_request",
            MigratorError::SourceData { .. } => "source_data",
            MigratorError::Sink { .. } => "sink",
            MigratorError::Database { .. } => "database",
            MigratorError::DatabaseQuery { .. } => "database_query",
            MigratorError::Serialization { .. } => "serialization",
            MigratorError::ConfigParse { .. } => "config_parse",
            MigratorError::ConfigMissing { .. } => "config_missing",
            MigratorError::ConfigInvalid { .. } => "config_invalid",
            MigratorError::Io { .. } => "io",
        }
    }
}

impl From<std::io::Error> for MigratorError {
    fn from(err: std::io::Error) -> Self {
        MigratorError::Io {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for MigratorError {
    fn from(err: serde_json::Error) -> Self {
        MigratorError::Serialization {
            reason: err.to_string(),
        }
    }
}

impl From<&MigratorError> for std::process::ExitCode {
    fn from(err: &MigratorError) -> Self {
        let code: u8 = match err {
            MigratorError::Io { .. } => 1,
            MigratorError::ConfigParse { .. }
            | MigratorError::ConfigMissing { .. }
            | MigratorError::ConfigInvalid { .. }
            | MigratorError::ProviderNotRegistered { .. } => 2,
            MigratorError::Database { .. }
            | MigratorError::DatabaseQuery { .. }
            | MigratorError::SourceUnavailable { .. }
            | MigratorError::SourceData { .. } => 3,
            MigratorError::UnknownAssetPair { .. }
            | MigratorError::InvalidAssetPair { .. }
            | MigratorError::InvalidRequest { .. } => 4,
            MigratorError::SnapshotWriteFailed { .. }
            | MigratorError::CleanupFailed { .. }
            | MigratorError::Sink { .. }
            | MigratorError::Serialization { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
