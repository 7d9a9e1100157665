//! File-per-key snapshot backend.
//!
//! Each key is stored as `<hex(key)>.json` in one directory. Writes go to a
//! temp file in the same directory which is synced and then renamed over the
//! target, so a crash leaves either the old or the new payload.

use crate::domain::error::MigratorError;
use crate::ports::snapshot_backend::SnapshotBackend;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub struct FileSnapshotBackend {
    dir: PathBuf,
}

impl FileSnapshotBackend {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, MigratorError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hex::encode(key)))
    }
}

async fn blocking<T, F>(f: F) -> Result<T, MigratorError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, MigratorError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MigratorError::Io {
            reason: format!("snapshot task failed: {e}"),
        })?
}

#[async_trait]
impl SnapshotBackend for FileSnapshotBackend {
    async fn write(&self, key: &str, payload: &str) -> Result<(), MigratorError> {
        let dir = self.dir.clone();
        let target = self.path_for(key);
        let payload = payload.to_string();
        blocking(move || {
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(payload.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target).map_err(|e| MigratorError::Io {
                reason: e.error.to_string(),
            })?;
            Ok(())
        })
        .await
    }

    async fn read(&self, key: &str) -> Result<Option<String>, MigratorError> {
        let path = self.path_for(key);
        blocking(move || match std::fs::read_to_string(&path) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        })
        .await
    }
}
