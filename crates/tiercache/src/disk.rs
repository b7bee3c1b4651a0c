//! The capacity-bounded, directory-backed persistent tier.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tokio::sync::{mpsc, oneshot};

use crate::error::{CacheContents, CacheError};
use crate::key::filename_for_key;

type Job = Box<dyn FnOnce(&mut DiskStore) + Send + 'static>;

/// A capacity-bounded store of encoded values, one directory per store.
///
/// All mutation and accounting runs on a single worker task per store,
/// strictly in submission order; the worker is the only writer of the
/// store's directory and its running size. When the size exceeds the
/// configured capacity, entries are evicted oldest-access-first, using
/// file mtime as the access time.
///
/// Bookkeeping failures (a file that cannot be touched or deleted) are
/// logged and skipped; they never abort an operation in progress.
pub struct DiskCache {
    dir: PathBuf,
    capacity: u64,
    tx: mpsc::UnboundedSender<Job>,
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("dir", &self.dir)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl DiskCache {
    /// Creates a store over `dir` with the given byte `capacity`.
    ///
    /// The directory is created if absent. The initial size scan and
    /// eviction pass run asynchronously on the store's worker, before
    /// any submitted operation.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(dir: PathBuf, capacity: u64) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let mut store = DiskStore {
            dir: dir.clone(),
            capacity,
            size: 0,
        };
        // the jobs do synchronous filesystem work, keep them off the
        // async worker threads
        tokio::task::spawn_blocking(move || {
            store.initialize();
            while let Some(job) = rx.blocking_recv() {
                job(&mut store);
            }
        });

        DiskCache { dir, capacity, tx }
    }

    /// The directory backing this store.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// The configured capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// The current accounted size in bytes, after the queue drains.
    pub async fn size(&self) -> u64 {
        self.call(|store| store.size).await.unwrap_or(0)
    }

    /// Writes `bytes` for `key`, replacing any previous entry.
    ///
    /// An absent byte value (a value that failed to encode) is logged
    /// and not written. The write is atomic and followed by an eviction
    /// pass.
    pub fn set_data(&self, bytes: Option<Vec<u8>>, key: &str) {
        let key = key.to_string();
        self.submit(move |store| match bytes {
            Some(bytes) => store.set_data(&bytes, &key),
            None => tracing::error!(key, "no data to write for key"),
        });
    }

    /// Reads the bytes stored for `key`, refreshing their access time.
    pub async fn fetch_data(&self, key: &str) -> CacheContents<Vec<u8>> {
        let key = key.to_string();
        self.call(move |store| store.fetch_data(&key)).await?
    }

    /// Touches the access time of `key` if present.
    ///
    /// If the entry is missing (for example after an eviction that the
    /// memory tier did not observe), `lazy_bytes` is evaluated and the
    /// entry is re-written through the regular `set_data` path.
    pub fn update_access_date<F>(&self, lazy_bytes: F, key: &str)
    where
        F: FnOnce() -> Option<Vec<u8>> + Send + 'static,
    {
        let key = key.to_string();
        self.submit(move |store| {
            if !store.touch(&key) {
                match lazy_bytes() {
                    Some(bytes) => store.set_data(&bytes, &key),
                    None => tracing::error!(key, "no data to re-write for evicted key"),
                }
            }
        });
    }

    /// Removes the entry for `key`, if present.
    pub async fn remove_data(&self, key: &str) {
        let key = key.to_string();
        let _ = self.call(move |store| store.remove_data(&key)).await;
    }

    /// Removes every entry and resets the accounted size to zero.
    pub async fn remove_all_data(&self) {
        let _ = self.call(|store| store.remove_all_data()).await;
    }

    /// Whether an entry for `key` currently exists on disk.
    pub async fn contains_key(&self, key: &str) -> bool {
        let key = key.to_string();
        self.call(move |store| store.path_for_key(&key).is_file())
            .await
            .unwrap_or(false)
    }

    fn submit(&self, f: impl FnOnce(&mut DiskStore) + Send + 'static) {
        if self.tx.send(Box::new(f)).is_err() {
            tracing::error!(dir = %self.dir.display(), "disk cache worker stopped");
        }
    }

    async fn call<R>(
        &self,
        f: impl FnOnce(&mut DiskStore) -> R + Send + 'static,
    ) -> CacheContents<R>
    where
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(move |store| {
            let _ = tx.send(f(store));
        });
        rx.await
            .map_err(|_| CacheError::Io("disk cache worker stopped".into()))
    }
}

/// The single-threaded state behind a [`DiskCache`] worker.
struct DiskStore {
    dir: PathBuf,
    capacity: u64,
    size: u64,
}

impl DiskStore {
    fn initialize(&mut self) {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            tracing::error!(
                error = &e as &dyn std::error::Error,
                dir = %self.dir.display(),
                "failed to create cache directory",
            );
        }
        self.size = self.scan_size();
        self.evict_if_needed();
    }

    fn scan_size(&self) -> u64 {
        self.entries().into_iter().map(|e| e.len).sum()
    }

    fn path_for_key(&self, key: &str) -> PathBuf {
        self.dir.join(filename_for_key(key))
    }

    fn set_data(&mut self, bytes: &[u8], key: &str) {
        let target = self.path_for_key(key);
        let old_len = target.metadata().map(|m| m.len()).unwrap_or(0);

        if let Err(e) = persist_atomically(&self.dir, &target, bytes) {
            tracing::error!(
                error = &e as &dyn std::error::Error,
                key,
                path = %target.display(),
                "failed to write cache file",
            );
            return;
        }

        // the old file may have appeared after the init scan and thus be
        // unaccounted, so never let the subtraction underflow
        self.size = self.size.saturating_sub(old_len) + bytes.len() as u64;
        self.evict_if_needed();
    }

    fn fetch_data(&mut self, key: &str) -> CacheContents<Vec<u8>> {
        let target = self.path_for_key(key);
        let bytes =
            fs::read(&target).map_err(|e| CacheError::from_io_for_key(e, key))?;

        // refreshing the access time is bookkeeping only
        if let Err(e) = filetime::set_file_mtime(&target, FileTime::now()) {
            tracing::warn!(
                error = &e as &dyn std::error::Error,
                key,
                "failed to update access date",
            );
        }
        Ok(bytes)
    }

    /// Touches the mtime for `key`, returning whether the entry existed.
    fn touch(&self, key: &str) -> bool {
        let target = self.path_for_key(key);
        if !target.is_file() {
            return false;
        }
        if let Err(e) = filetime::set_file_mtime(&target, FileTime::now()) {
            tracing::warn!(
                error = &e as &dyn std::error::Error,
                key,
                "failed to update access date",
            );
        }
        true
    }

    fn remove_data(&mut self, key: &str) {
        let target = self.path_for_key(key);
        let len = match target.metadata() {
            Ok(metadata) => metadata.len(),
            // already gone
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            Err(_) => 0,
        };
        match fs::remove_file(&target) {
            Ok(()) => self.size = self.size.saturating_sub(len),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::error!(
                error = &e as &dyn std::error::Error,
                key,
                "failed to remove cache file",
            ),
        }
    }

    fn remove_all_data(&mut self) {
        for entry in self.entries() {
            if let Err(e) = fs::remove_file(&entry.path) {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    path = %entry.path.display(),
                    "failed to remove cache file",
                );
            }
        }
        self.size = 0;
    }

    fn evict_if_needed(&mut self) {
        if self.size <= self.capacity {
            return;
        }

        let mut entries = self.entries();
        // oldest access first; file name breaks mtime ties deterministically
        entries.sort_by(|a, b| (a.mtime, &a.path).cmp(&(b.mtime, &b.path)));

        for entry in entries {
            if self.size <= self.capacity {
                break;
            }
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    tracing::debug!(path = %entry.path.display(), "evicted cache file");
                    self.size = self.size.saturating_sub(entry.len);
                }
                Err(e) => tracing::error!(
                    error = &e as &dyn std::error::Error,
                    path = %entry.path.display(),
                    "failed to evict cache file",
                ),
            }
        }
    }

    /// Enumerates the store's files, skipping anything unreadable.
    fn entries(&self) -> Vec<StoredEntry> {
        let dir = match fs::read_dir(&self.dir) {
            Ok(dir) => dir,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::error!(
                        error = &e as &dyn std::error::Error,
                        dir = %self.dir.display(),
                        "failed to enumerate cache directory",
                    );
                }
                return Vec::new();
            }
        };

        let mut entries = Vec::new();
        for entry in dir {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            let Ok(metadata) = entry.metadata() else { continue };
            if !metadata.is_file() {
                continue;
            }
            entries.push(StoredEntry {
                mtime: FileTime::from_last_modification_time(&metadata),
                len: metadata.len(),
                path,
            });
        }
        entries
    }
}

struct StoredEntry {
    path: PathBuf,
    mtime: FileTime,
    len: u64,
}

/// Writes `bytes` to a sibling temp file and persists it to `target`.
///
/// A cleanup pass (or `remove_all`) can delete the directory we operate
/// in mid-write, so directory creation and persisting are retried.
fn persist_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> io::Result<()> {
    const MAX_RETRIES: usize = 2;
    let mut retries = 0;
    loop {
        retries += 1;

        if let Err(e) = fs::create_dir_all(dir) {
            if retries > MAX_RETRIES {
                return Err(e);
            }
            continue;
        }

        let mut temp_file = match tempfile::Builder::new().prefix("tmp").tempfile_in(dir) {
            Ok(temp_file) => temp_file,
            Err(e) => {
                if retries > MAX_RETRIES {
                    return Err(e);
                }
                continue;
            }
        };

        io::Write::write_all(&mut temp_file, bytes)?;

        match temp_file.persist(target) {
            Ok(_) => return Ok(()),
            Err(e) => {
                if retries > MAX_RETRIES {
                    return Err(e.error);
                }
                continue;
            }
        }
    }
}
