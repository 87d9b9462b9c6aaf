//! Atomically swappable reference to the active cache.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::info;

use super::{Cache, CacheStrategy};

/// Holds the currently published cache behind an `ArcSwap`.
///
/// Readers take a snapshot with [`CacheHandle::current`] at call time. A swap
/// never disturbs a snapshot already taken: operations that started before the
/// swap finish against the old cache, later ones see the new cache.
pub struct CacheHandle {
    inner: ArcSwap<Arc<dyn Cache>>,
}

impl CacheHandle {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            inner: ArcSwap::from_pointee(cache),
        }
    }

    /// Snapshot of the active cache (single atomic load).
    pub fn current(&self) -> Arc<dyn Cache> {
        let guard = self.inner.load();
        Arc::clone(&**guard)
    }

    /// Strategy of the active cache.
    pub fn strategy(&self) -> CacheStrategy {
        self.inner.load().strategy()
    }

    /// Publish `cache` as the active cache and return the previous one.
    pub fn publish(&self, cache: Arc<dyn Cache>) -> Arc<dyn Cache> {
        let strategy = cache.strategy();
        let previous = self.inner.swap(Arc::new(cache));
        info!(from = %previous.strategy(), to = %strategy, "Published new cache");
        Arc::clone(&*previous)
    }
}
