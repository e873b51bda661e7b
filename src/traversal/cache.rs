use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::traversal::structure::Structure;

/// LRU cache from a query fingerprint to its split structures, shared
/// through the schema cache so repeated queries skip re-partitioning.
pub struct TraversalCache {
    inner: Mutex<LruCache<u64, Arc<Vec<Structure>>>>,
}

impl TraversalCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to nonzero");
        TraversalCache {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, fingerprint: u64) -> Option<Arc<Vec<Structure>>> {
        self.inner.lock().get(&fingerprint).cloned()
    }

    pub fn put(&self, fingerprint: u64, structures: Arc<Vec<Structure>>) {
        self.inner.lock().put(fingerprint, structures);
    }

    pub fn get_or_insert_with(
        &self,
        fingerprint: u64,
        build: impl FnOnce() -> Vec<Structure>,
    ) -> Arc<Vec<Structure>> {
        let mut inner = self.inner.lock();
        if let Some(cached) = inner.get(&fingerprint) {
            return Arc::clone(cached);
        }
        let built = Arc::new(build());
        inner.put(fingerprint, Arc::clone(&built));
        built
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
