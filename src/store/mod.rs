//! Durable-backed ordered collection of catalog [`Item`]s.
//!
//! The [`RecordStore`] keeps items in arrival order and delegates persistence to a
//! [`SnapshotBackend`]. Every successful [`append`](RecordStore::append) rewrites the whole
//! snapshot. The store has no notion of identity or uniqueness; that is the responsibility of
//! the [`Catalog`](crate::catalog::Catalog) which owns it.

use std::fmt;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::item::Item;

mod error;
mod json;
mod memory;

pub use error::StorageError;
pub use json::JsonFileBackend;
pub use memory::MemoryBackend;

/// The durable medium holding the record snapshot.
#[async_trait]
pub trait SnapshotBackend: Send + Sync + fmt::Debug {
    /// Read the full snapshot.
    async fn load(&self) -> Result<Vec<Item>, StorageError>;

    /// Replace the full snapshot with `items`.
    async fn store(&self, items: &[Item]) -> Result<(), StorageError>;
}

/// Ordered, append-only collection of [`Item`]s mirrored to a [`SnapshotBackend`].
///
/// # Divergence
/// [`append`](Self::append) advances the in-memory sequence *before* writing the snapshot and
/// does not roll back when the write fails. From that point until the next successful write the
/// durable snapshot lags behind memory. The store records this in [`is_diverged`](Self::is_diverged)
/// and logs when it enters and leaves the diverged state.
#[derive(Debug)]
pub struct RecordStore {
    items: Vec<Item>,
    backend: Box<dyn SnapshotBackend>,
    diverged: bool,
}

impl RecordStore {
    /// Load the initial snapshot from `backend`.
    pub async fn open(backend: impl SnapshotBackend + 'static) -> Result<Self, StorageError> {
        let items = backend.load().await?;
        info!(records = items.len(), "Record store opened");

        Ok(Self {
            items,
            backend: Box::new(backend),
            diverged: false,
        })
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// First item whose title matches exactly.
    pub fn find(&self, title: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.title == title)
    }

    pub fn contains_title(&self, title: &str) -> bool {
        self.find(title).is_some()
    }

    /// Whether the in-memory sequence is ahead of the last durable snapshot.
    pub fn is_diverged(&self) -> bool {
        self.diverged
    }

    /// Append `item` and rewrite the durable snapshot.
    ///
    /// On error the item stays in memory and the store is marked diverged.
    pub async fn append(&mut self, item: Item) -> Result<(), StorageError> {
        self.items.push(item);

        match self.backend.store(&self.items).await {
            Ok(()) => {
                if self.diverged {
                    info!(records = self.items.len(), "Record snapshot back in sync");
                    self.diverged = false;
                }
                Ok(())
            }
            Err(e) => {
                if !self.diverged {
                    warn!(
                        records = self.items.len(),
                        error = %e,
                        "Record snapshot write failed, memory is ahead of durable storage"
                    );
                }
                self.diverged = true;
                Err(e)
            }
        }
    }
}
