//! The cache orchestrator tying formats, tiers and fetchers together.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::disk::DiskCache;
use crate::error::CacheError;
use crate::fetch::{Fetch, SuccessFn};
use crate::fetcher::Fetcher;
use crate::format::Format;
use crate::memory::MemoryCache;
use crate::value::CacheValue;

/// One registered format with its pair of stores.
pub(crate) struct FormatEntry<T> {
    pub(crate) format: Format<T>,
    pub(crate) memory: MemoryCache<T>,
    pub(crate) disk: DiskCache,
}

/// A named, two-tier content cache for values of type `T`.
///
/// Each registered [`Format`] owns a volatile memory store of decoded
/// values and a capacity-bounded disk store of encoded bytes at
/// `<cache_root>/<cache-name>/<format-name>/`. Lookups go memory →
/// disk → (optionally) a [`Fetcher`], populating the tiers on the way
/// back. The `"original"` format (identity transform, unbounded disk
/// budget) is registered on construction.
///
/// Must be constructed within a tokio runtime, which also runs all of
/// its background work. The host environment is expected to call
/// [`on_low_memory_signal`](Self::on_low_memory_signal) from its
/// memory-pressure hook.
pub struct Cache<T> {
    name: String,
    config: Config,
    formats: Mutex<HashMap<String, Arc<FormatEntry<T>>>>,
}

impl<T> Cache<T>
where
    T: CacheValue + Clone + Send + Sync + 'static,
{
    /// Creates a cache with the implicit `"original"` format.
    pub fn new(name: impl Into<String>, config: Config) -> Self {
        let cache = Cache {
            name: name.into(),
            config,
            formats: Mutex::new(HashMap::new()),
        };
        cache.add_format(Format::original());
        cache
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers `format`, allocating its memory and disk stores.
    ///
    /// The format set is append-only: re-registering an existing name
    /// is rejected and never touches the existing entry.
    pub fn add_format(&self, format: Format<T>) {
        let mut formats = self.formats.lock().unwrap();
        if formats.contains_key(format.name()) {
            tracing::error!(
                format = format.name(),
                cache = self.name,
                "format is already registered, ignoring",
            );
            return;
        }

        let dir = self.config.format_dir(&self.name, format.name());
        let disk = DiskCache::new(dir, format.disk_capacity());
        let entry = FormatEntry {
            format,
            memory: MemoryCache::new(),
            disk,
        };
        formats.insert(entry.format.name().to_string(), Arc::new(entry));
    }

    /// Stores `value` under `key` in the given format.
    ///
    /// The value is run through the format's transform pipeline and
    /// written to both tiers; the disk write is asynchronous.
    /// `on_complete` is invoked with the transformed value once the
    /// memory write is visible. For identity formats that happens
    /// before this method returns.
    ///
    /// # Panics
    ///
    /// Panics if `format_name` was never registered; setting a value
    /// against an unknown format is a programming error.
    pub fn set(&self, value: T, key: &str, format_name: &str, on_complete: Option<SuccessFn<T>>) {
        let Some(entry) = self.entry(format_name) else {
            panic!(
                "format `{format_name}` is not registered in cache `{}`",
                self.name
            );
        };
        let fetch = Self::store(entry, value, key.to_string());
        if let Some(on_complete) = on_complete {
            fetch.on_success(on_complete);
        }
    }

    /// Looks `key` up in the given format.
    ///
    /// A memory hit resolves synchronously and refreshes the disk
    /// entry's access time in the background. A disk hit decodes
    /// asynchronously and populates the memory tier. A miss fails with
    /// [`CacheError::ObjectNotFound`]; an unknown format fails
    /// synchronously with [`CacheError::FormatNotFound`].
    pub fn fetch(&self, key: &str, format_name: &str) -> Fetch<T> {
        let fetch = Fetch::new();
        let Some(entry) = self.entry(format_name) else {
            fetch.fail(CacheError::FormatNotFound(format_name.to_string()));
            return fetch;
        };
        Self::fetch_from_tiers(entry, key.to_string(), fetch.clone());
        fetch
    }

    /// Looks the fetcher's key up, invoking the fetcher on a miss.
    ///
    /// Any tier failure except [`CacheError::FormatNotFound`] falls
    /// through to the fetcher; its value is then stored via the regular
    /// `set` pipeline, and the returned fetch resolves from that
    /// store's completion. Hold on to the fetcher to be able to
    /// [`cancel`](Fetcher::cancel) it.
    pub fn fetch_from(&self, fetcher: Arc<dyn Fetcher<T>>, format_name: &str) -> Fetch<T> {
        let fetch = Fetch::new();
        let Some(entry) = self.entry(format_name) else {
            fetch.fail(CacheError::FormatNotFound(format_name.to_string()));
            return fetch;
        };
        let key = fetcher.key().to_string();

        let tiers = Fetch::new();
        Self::fetch_from_tiers(entry.clone(), key.clone(), tiers.clone());

        let resolved = fetch.clone();
        let tiers = tiers.on_success(move |value| resolved.succeed(value));

        let resolved = fetch.clone();
        tiers.on_failure(move |error| {
            tracing::debug!(
                error = %error,
                key,
                "cache miss, invoking fetcher",
            );
            let failed = resolved.clone();
            let succeeded = resolved.clone();
            let on_success: SuccessFn<T> = Box::new(move |value| {
                Self::store(entry, value, key)
                    .on_success(move |value| succeeded.succeed(value));
            });
            fetcher.fetch(Box::new(move |error| failed.fail(error)), on_success);
        });

        fetch
    }

    /// Removes `key` from both tiers of one format.
    pub fn remove(&self, key: &str, format_name: &str) {
        let Some(entry) = self.entry(format_name) else {
            tracing::error!(
                format = format_name,
                cache = self.name,
                "cannot remove from unregistered format",
            );
            return;
        };
        entry.memory.remove(key);
        let key = key.to_string();
        tokio::spawn(async move {
            entry.disk.remove_data(&key).await;
        });
    }

    /// Removes `key` from every registered format.
    ///
    /// Disk removals across formats are awaited up to the configured
    /// bulk timeout; a timeout is logged, not failed.
    pub async fn remove_all_for_key(&self, key: &str) {
        let entries = self.entries();
        for entry in &entries {
            entry.memory.remove(key);
        }

        let removals = futures::future::join_all(
            entries.iter().map(|entry| entry.disk.remove_data(key)),
        );
        if tokio::time::timeout(self.config.bulk_timeout, removals)
            .await
            .is_err()
        {
            tracing::warn!(key, cache = self.name, "timed out removing key from disk");
        }
    }

    /// Clears every tier of every format and deletes the cache's
    /// backing directory tree.
    pub async fn remove_all(&self) {
        let entries = self.entries();
        for entry in &entries {
            entry.memory.clear();
        }

        let removals =
            futures::future::join_all(entries.iter().map(|entry| entry.disk.remove_all_data()));
        if tokio::time::timeout(self.config.bulk_timeout, removals)
            .await
            .is_err()
        {
            tracing::warn!(cache = self.name, "timed out clearing disk stores");
        }

        let dir = self.config.cache_dir(&self.name);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    dir = %dir.display(),
                    "failed to delete cache directory",
                );
            }
        }
    }

    /// Drops every format's memory tier.
    ///
    /// The host environment must wire this to its memory-pressure
    /// notification for every live cache instance.
    pub fn on_low_memory_signal(&self) {
        for entry in self.entries() {
            entry.memory.clear();
        }
    }

    /// Runs the transform pipeline on `value` and writes it to both
    /// tiers, resolving the returned fetch with the transformed value
    /// once the memory write is visible. Synchronous for identity
    /// formats.
    fn store(entry: Arc<FormatEntry<T>>, value: T, key: String) -> Fetch<T> {
        let fetch = Fetch::new();
        if entry.format.is_identity() {
            Self::finish_store(&entry, value, &key, &fetch);
        } else {
            let fetch = fetch.clone();
            tokio::spawn(async move {
                let value = entry.format.apply(value).await;
                Self::finish_store(&entry, value, &key, &fetch);
            });
        }
        fetch
    }

    fn finish_store(entry: &FormatEntry<T>, value: T, key: &str, fetch: &Fetch<T>) {
        let value = entry.format.prepare(value);
        entry.memory.insert(key, value.clone());
        entry.disk.set_data(entry.format.encode(&value), key);
        fetch.succeed(value);
    }

    fn fetch_from_tiers(entry: Arc<FormatEntry<T>>, key: String, fetch: Fetch<T>) {
        if let Some(value) = entry.memory.get(&key) {
            // refresh the access time without materializing bytes unless
            // the disk entry went missing
            let format = entry.format.clone();
            let disk_value = value.clone();
            entry
                .disk
                .update_access_date(move || format.encode(&disk_value), &key);
            fetch.succeed(value);
            return;
        }

        tokio::spawn(async move {
            match entry.disk.fetch_data(&key).await {
                Ok(bytes) => match T::decode(&bytes) {
                    Some(value) => {
                        // decoded values go through the same post-transform
                        // hook as freshly stored ones
                        let value = entry.format.prepare(value);
                        entry.memory.insert(&key, value.clone());
                        fetch.succeed(value);
                    }
                    None => fetch.fail(CacheError::InvalidData),
                },
                Err(error) => fetch.fail(error),
            }
        });
    }

    pub(crate) fn entry(&self, format_name: &str) -> Option<Arc<FormatEntry<T>>> {
        self.formats.lock().unwrap().get(format_name).cloned()
    }

    fn entries(&self) -> Vec<Arc<FormatEntry<T>>> {
        self.formats.lock().unwrap().values().cloned().collect()
    }
}
