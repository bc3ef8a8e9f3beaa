//! Destination for rows of catalog (HiPS catalogue) tiles.

use std::sync::{Arc, Mutex, MutexGuard};

use rustc_hash::FxHashMap;
use starmap_tiles::{CatalogRows, TileKey};

/// Receives catalog rows as their tiles come into and go out of view.
pub trait CatalogSink: Send {
    fn add_rows(&mut self, key: &TileKey, rows: &CatalogRows);
    fn remove_rows(&mut self, key: &TileKey);
}

/// In-memory sink; clones share the same row set.
#[derive(Clone, Debug, Default)]
pub struct MemoryCatalog {
    shown: Arc<Mutex<FxHashMap<TileKey, usize>>>,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<TileKey, usize>> {
        self.shown.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Tiles whose rows are shown.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.lock().values().sum()
    }

    #[must_use]
    pub fn contains(&self, key: &TileKey) -> bool {
        self.lock().contains_key(key)
    }
}

impl CatalogSink for MemoryCatalog {
    fn add_rows(&mut self, key: &TileKey, rows: &CatalogRows) {
        self.lock().insert(key.clone(), rows.len());
    }

    fn remove_rows(&mut self, key: &TileKey) {
        self.lock().remove(key);
    }
}
