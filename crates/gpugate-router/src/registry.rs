use arc_swap::ArcSwap;
use gpugate_common::BackendSpec;
use std::sync::Arc;
use tracing::info;

use crate::backend::Backend;

/// The active backend set.
///
/// Readers take a lock-free snapshot of the whole set; `reload` publishes a
/// complete replacement in one atomic swap, so a reader sees either the old
/// set or the new one and never a mix of both.
#[derive(Debug)]
pub struct BackendRegistry {
    backends: ArcSwap<Vec<Arc<Backend>>>,
}

impl BackendRegistry {
    pub fn new(specs: Vec<BackendSpec>) -> Self {
        Self {
            backends: ArcSwap::from_pointee(build(specs)),
        }
    }

    /// Snapshot of the current set, in configuration order.
    pub fn list(&self) -> Arc<Vec<Arc<Backend>>> {
        self.backends.load_full()
    }

    /// Replaces the whole set. Health and capacity state start fresh.
    ///
    /// Requests already holding a backend from the old set keep it until they
    /// finish; their slots are released against the old `Backend` value.
    pub fn reload(&self, specs: Vec<BackendSpec>) -> Arc<Vec<Arc<Backend>>> {
        let count = specs.len();
        let previous = self.backends.swap(Arc::new(build(specs)));
        info!(
            "Backend registry reloaded: {} -> {} backends",
            previous.len(),
            count
        );
        previous
    }

    pub fn get(&self, address: &str) -> Option<Arc<Backend>> {
        self.backends
            .load()
            .iter()
            .find(|b| b.address() == address)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.backends.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn addresses(&self) -> Vec<String> {
        self.backends
            .load()
            .iter()
            .map(|b| b.address().to_string())
            .collect()
    }
}

fn build(specs: Vec<BackendSpec>) -> Vec<Arc<Backend>> {
    specs.into_iter().map(|s| Arc::new(Backend::new(s))).collect()
}
