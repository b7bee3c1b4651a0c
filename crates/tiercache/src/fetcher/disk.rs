//! A fetcher reading values from the local filesystem.

use std::io;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::CacheError;
use crate::fetch::{FailureFn, SuccessFn};
use crate::value::CacheValue;

use super::Fetcher;

/// Reads and decodes a file on a background task.
///
/// A missing file fails with `ObjectNotFound`, other read errors are
/// passed through, and bytes that do not decode fail with
/// `InvalidData`. Cancellation suppresses callback delivery for a read
/// already in flight.
pub struct DiskFetcher<T> {
    key: String,
    path: PathBuf,
    cancelled: Arc<AtomicBool>,
    _value: PhantomData<fn() -> T>,
}

impl<T: CacheValue> DiskFetcher<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        DiskFetcher {
            key: path.to_string_lossy().into_owned(),
            path,
            cancelled: Arc::new(AtomicBool::new(false)),
            _value: PhantomData,
        }
    }
}

impl<T> Fetcher<T> for DiskFetcher<T>
where
    T: CacheValue + Send + 'static,
{
    fn key(&self) -> &str {
        &self.key
    }

    fn fetch(&self, on_failure: FailureFn, on_success: SuccessFn<T>) {
        let path = self.path.clone();
        let key = self.key.clone();
        let cancelled = self.cancelled.clone();

        tokio::spawn(async move {
            let result = match tokio::fs::read(&path).await {
                Ok(bytes) => T::decode(&bytes).ok_or(CacheError::InvalidData),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    Err(CacheError::ObjectNotFound(key))
                }
                Err(e) => Err(e.into()),
            };

            if cancelled.load(Ordering::SeqCst) {
                return;
            }
            match result {
                Ok(value) => on_success(value),
                Err(error) => on_failure(error),
            }
        });
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}
