use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{SnapshotBackend, StorageError};
use crate::item::Item;

/// Keeps the record snapshot in process memory.
///
/// Clones share the same snapshot, so a test can hold one handle while the store owns another.
/// Writes can be switched to fail with [`set_fail_writes`](Self::set_fail_writes).
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    snapshot: Arc<Mutex<Vec<Item>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend whose initial snapshot holds `items`.
    pub fn with_items(items: Vec<Item>) -> Self {
        Self {
            snapshot: Arc::new(Mutex::new(items)),
            fail_writes: Arc::default(),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// The last successfully stored snapshot.
    pub fn snapshot(&self) -> Vec<Item> {
        self.snapshot
            .lock()
            .expect("memory snapshot lock poisoned")
            .clone()
    }
}

#[async_trait]
impl SnapshotBackend for MemoryBackend {
    async fn load(&self) -> Result<Vec<Item>, StorageError> {
        Ok(self.snapshot())
    }

    async fn store(&self, items: &[Item]) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "memory backend is rejecting writes".to_string(),
            ));
        }

        *self
            .snapshot
            .lock()
            .expect("memory snapshot lock poisoned") = items.to_vec();
        Ok(())
    }
}
