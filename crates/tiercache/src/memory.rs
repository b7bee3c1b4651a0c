//! The volatile in-process tier.

use moka::sync::Cache as MokaCache;

/// A thread-safe, keyed store of decoded values.
///
/// This tier is unbounded by policy: entries stay until they are
/// explicitly removed or the whole store is cleared in response to a
/// memory-pressure signal. It is purely an accelerator over the disk
/// tier and never the source of truth.
#[derive(Clone)]
pub struct MemoryCache<T> {
    inner: MokaCache<String, T>,
}

impl<T> MemoryCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        MemoryCache {
            inner: MokaCache::builder().build(),
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.inner.get(key)
    }

    pub fn insert(&self, key: &str, value: T) {
        self.inner.insert(key.to_string(), value);
    }

    pub fn remove(&self, key: &str) {
        self.inner.invalidate(key);
    }

    /// Drops every entry in the store.
    pub fn clear(&self) {
        self.inner.invalidate_all();
    }
}

impl<T> Default for MemoryCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
