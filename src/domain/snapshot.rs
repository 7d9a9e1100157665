//! Typed snapshot store over a raw key-value backend.

use crate::domain::error::MigratorError;
use crate::ports::snapshot_backend::SnapshotBackend;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;

/// Persists values of type `S` as JSON under `namespace:key`.
///
/// A save replaces the previous value whole; readers never observe a
/// partially written snapshot.
pub struct SnapshotStore<S> {
    backend: Arc<dyn SnapshotBackend>,
    namespace: String,
    _state: PhantomData<fn() -> S>,
}

impl<S> Clone for SnapshotStore<S> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            namespace: self.namespace.clone(),
            _state: PhantomData,
        }
    }
}

impl<S: Serialize + DeserializeOwned> SnapshotStore<S> {
    pub fn new(backend: Arc<dyn SnapshotBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
            _state: PhantomData,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }

    /// Store `state` under `key`. Any failure is reported as
    /// `SnapshotWriteFailed`.
    pub async fn save(&self, key: &str, state: &S) -> Result<(), MigratorError> {
        let full = self.full_key(key);
        let payload = serde_json::to_string(state).map_err(|e| MigratorError::SnapshotWriteFailed {
            key: full.clone(),
            reason: e.to_string(),
        })?;
        self.backend
            .write(&full, &payload)
            .await
            .map_err(|e| match e {
                MigratorError::SnapshotWriteFailed { .. } => e,
                other => MigratorError::SnapshotWriteFailed {
                    key: full.clone(),
                    reason: other.to_string(),
                },
            })
    }

    /// Most recent snapshot under `key`, or `None` if none was ever saved.
    pub async fn try_get(&self, key: &str) -> Result<Option<S>, MigratorError> {
        let full = self.full_key(key);
        match self.backend.read(&full).await? {
            Some(payload) => {
                let state = serde_json::from_str(&payload).map_err(|e| MigratorError::Serialization {
                    reason: format!("snapshot {full}: {e}"),
                })?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }
}
