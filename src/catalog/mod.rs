//! Shared catalog state used by every call.
//!
//! The [`RecordStore`] is only reachable through a [`Catalog`], and every read or mutation goes
//! through one [`RwLock`]. Uploads hold the write lock across the existence check, the append
//! and the snapshot rewrite, so two concurrent uploads of the same title can never both insert it
//! and two concurrent uploads of different titles can never lose each other's write.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::item::Item;
use crate::store::{RecordStore, SnapshotBackend, StorageError};

/// Result of uploading one item.
#[derive(Debug)]
pub enum UploadOutcome {
    /// The title was new; the item was appended and persisted.
    Uploaded,
    /// An item with the same title is already stored; nothing changed.
    AlreadyExists,
    /// The title was new and the item was appended in memory, but persisting it failed.
    Failed(StorageError),
}

impl UploadOutcome {
    pub fn is_uploaded(&self) -> bool {
        matches!(self, UploadOutcome::Uploaded)
    }
}

#[derive(Debug, Clone)]
pub struct Catalog {
    store: Arc<RwLock<RecordStore>>,
}

impl Catalog {
    pub fn new(store: RecordStore) -> Self {
        Self {
            store: Arc::new(RwLock::new(store)),
        }
    }

    /// Load the record snapshot from `backend` and wrap it in a catalog.
    pub async fn open(backend: impl SnapshotBackend + 'static) -> Result<Self, StorageError> {
        Ok(Self::new(RecordStore::open(backend).await?))
    }

    /// The first item with exactly this title.
    pub async fn lookup(&self, title: &str) -> Option<Item> {
        self.store.read().await.find(title).cloned()
    }

    /// Every item by exactly this artist, in store order.
    ///
    /// The matches are copied out under the read lock, so the caller can stream them at its own
    /// pace without holding up uploads.
    pub async fn filter_by_artist(&self, artist: &str) -> Vec<Item> {
        self.store
            .read()
            .await
            .items()
            .iter()
            .filter(|item| item.artist == artist)
            .cloned()
            .collect()
    }

    /// Prices of every stored item with exactly this title.
    pub async fn prices_for(&self, title: &str) -> Vec<f64> {
        self.store
            .read()
            .await
            .items()
            .iter()
            .filter(|item| item.title == title)
            .map(|item| item.price)
            .collect()
    }

    /// Append `item` unless its title is already present.
    pub async fn upload(&self, item: Item) -> UploadOutcome {
        let mut store = self.store.write().await;

        if store.contains_title(&item.title) {
            debug!(title = %item.title, "Upload skipped, title already stored");
            return UploadOutcome::AlreadyExists;
        }

        let title = item.title.clone();
        match store.append(item).await {
            Ok(()) => {
                info!(title = %title, records = store.len(), "Item uploaded");
                UploadOutcome::Uploaded
            }
            Err(e) => {
                warn!(title = %title, error = %e, "Item kept in memory but not persisted");
                UploadOutcome::Failed(e)
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    /// Whether memory is ahead of the durable snapshot after a failed write.
    pub async fn is_diverged(&self) -> bool {
        self.store.read().await.is_diverged()
    }
}
