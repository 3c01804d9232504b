//! In-memory dataset store.
//!
//! Datasets are held behind `Arc` and swapped whole under a write lock, so a
//! reader holding a snapshot never observes a partially replaced dataset.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::data::Dataset;
use crate::schema::DatasetKind;

/// Owns every loaded dataset, keyed by name.
#[derive(Debug, Default)]
pub struct DatasetStore {
    datasets: RwLock<HashMap<String, Arc<Dataset>>>,
}

impl DatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace the dataset stored under `dataset.name`.
    /// This is the store's only mutator. Returns the previous dataset.
    pub fn replace(&self, dataset: Dataset) -> Option<Arc<Dataset>> {
        let name = dataset.name.clone();
        let rows = dataset.len();
        let previous = self.datasets.write().insert(name.clone(), Arc::new(dataset));
        debug!(dataset = %name, rows, replaced = previous.is_some(), "Dataset stored");
        previous
    }

    pub fn get(&self, name: &str) -> Option<Arc<Dataset>> {
        self.datasets.read().get(name).cloned()
    }

    /// Every dataset, ordered by kind then name.
    pub fn snapshot(&self) -> Vec<Arc<Dataset>> {
        let mut datasets: Vec<Arc<Dataset>> = self.datasets.read().values().cloned().collect();
        datasets.sort_by(|a, b| (a.kind, &a.name).cmp(&(b.kind, &b.name)));
        datasets
    }

    /// Datasets of one kind, ordered by name.
    pub fn of_kind(&self, kind: DatasetKind) -> Vec<Arc<Dataset>> {
        self.snapshot()
            .into_iter()
            .filter(|d| d.kind == kind)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.datasets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.read().is_empty()
    }
}
