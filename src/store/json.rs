use std::ffi::OsString;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tracing::debug;

use super::{SnapshotBackend, StorageError};
use crate::item::Item;

/// Persists the record snapshot as a tab-indented JSON array on the local filesystem.
///
/// Every [`store`](SnapshotBackend::store) rewrites the whole file. The new snapshot is first
/// written to a sibling `<path>.tmp` file and then renamed over the original, so a failed write
/// never leaves a truncated snapshot behind. There is no fsync of the parent directory and no
/// write-ahead log, so a crash between writing and renaming can still lose the latest append.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn staging_path(&self) -> PathBuf {
        let mut staging = OsString::from(self.path.as_os_str());
        staging.push(".tmp");
        PathBuf::from(staging)
    }
}

/// Encode `items` the way the record file is laid out on disk.
pub(crate) fn encode_snapshot(items: &[Item]) -> Result<Vec<u8>, StorageError> {
    let mut buf = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"\t"));
    items.serialize(&mut serializer)?;
    buf.push(b'\n');
    Ok(buf)
}

#[async_trait]
impl SnapshotBackend for JsonFileBackend {
    async fn load(&self) -> Result<Vec<Item>, StorageError> {
        let data = tokio::fs::read(&self.path)
            .await
            .map_err(|source| StorageError::Read {
                path: self.path.clone(),
                source,
            })?;

        let items: Vec<Item> =
            serde_json::from_slice(&data).map_err(|source| StorageError::Decode {
                path: self.path.clone(),
                source,
            })?;

        debug!(path = %self.path.display(), records = items.len(), "Loaded record snapshot");
        Ok(items)
    }

    async fn store(&self, items: &[Item]) -> Result<(), StorageError> {
        let data = encode_snapshot(items)?;
        let staging = self.staging_path();

        tokio::fs::write(&staging, &data)
            .await
            .map_err(|source| StorageError::Write {
                path: staging.clone(),
                source,
            })?;

        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|source| StorageError::Write {
                path: self.path.clone(),
                source,
            })?;

        debug!(path = %self.path.display(), records = items.len(), "Wrote record snapshot");
        Ok(())
    }
}
